// This code is sourced primarily from the tungstenite-rs library, which can be found at:
// https://github.com/snapview/tungstenite-rs/blob/42b8797e8b7f39efb7d9322dc8af3e9089db4f7d/src/protocol/frame/coding.rs#L117
//
// Original contributions by:
// Copyright (c) 2017 Alexey Galakhov
// Copyright (c) 2016 Jason Housley
// Licensed under both MIT and Apache 2.0 licenses
//
// Modifications made by:
// Copyright 2023 Divy Srivastava <dj.srivastava23@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// You may obtain a copy of the License at:
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is provided "AS IS", WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. See the License for specific language governing permissions and limitations.

//! Close status codes and the outcome of a close handshake.
//!
//! Status codes are those of RFC 6455 Section 7.4 together with the later
//! IANA registrations (1012-1014). [`CloseCode::is_allowed`] tells whether a
//! code may appear in a close frame on the wire; codes such as 1005 and 1006
//! exist only to describe a closure locally.

use std::fmt;

use bytes::{BufMut, BytesMut};

use self::CloseCode::*;

/// Maximum close reason length: 125 byte control payload minus the status code.
pub const MAX_REASON_LEN: usize = 123;

/// Status codes representing the reasons why an endpoint is closing the WebSocket connection.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum CloseCode {
    /// Normal closure; the purpose of the connection has been fulfilled.
    Normal,
    /// The endpoint is going away, e.g. a server shutting down.
    Away,
    /// The endpoint received a frame that violates the protocol.
    Protocol,
    /// The endpoint received a type of data it cannot accept.
    Unsupported,
    /// No status code was present in the close frame. Never sent on the wire.
    Status,
    /// The connection dropped without a close frame. Never sent on the wire.
    Abnormal,
    /// Message data was inconsistent with its type, e.g. invalid UTF-8 in a text message.
    Invalid,
    /// Generic policy violation.
    Policy,
    /// A message was too big to process.
    Size,
    /// The client expected an extension the server did not negotiate.
    Extension,
    /// The server hit an unexpected condition.
    Error,
    /// The server is restarting.
    Restart,
    /// The server is overloaded, try again later.
    Again,
    /// A gateway or proxy received an invalid response upstream.
    BadGateway,
    #[doc(hidden)]
    /// TLS handshake failure. Never sent on the wire.
    Tls,
    #[doc(hidden)]
    /// Codes reserved for future protocol revisions (1016-2999).
    Reserved(u16),
    #[doc(hidden)]
    /// Codes registered with IANA by libraries and frameworks (3000-3999).
    Iana(u16),
    #[doc(hidden)]
    /// Codes for private use between applications (4000-4999).
    Library(u16),
    #[doc(hidden)]
    /// Codes outside every defined range.
    Bad(u16),
}

impl CloseCode {
    /// Check if this CloseCode may be sent in a close frame.
    pub fn is_allowed(self) -> bool {
        !matches!(self, Bad(_) | Reserved(_) | Status | Abnormal | Tls)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> CloseCode {
        match code {
            1000 => Normal,
            1001 => Away,
            1002 => Protocol,
            1003 => Unsupported,
            1005 => Status,
            1006 => Abnormal,
            1007 => Invalid,
            1008 => Policy,
            1009 => Size,
            1010 => Extension,
            1011 => Error,
            1012 => Restart,
            1013 => Again,
            1014 => BadGateway,
            1015 => Tls,
            1016..=2999 => Reserved(code),
            3000..=3999 => Iana(code),
            4000..=4999 => Library(code),
            _ => Bad(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            Normal => 1000,
            Away => 1001,
            Protocol => 1002,
            Unsupported => 1003,
            Status => 1005,
            Abnormal => 1006,
            Invalid => 1007,
            Policy => 1008,
            Size => 1009,
            Extension => 1010,
            Error => 1011,
            Restart => 1012,
            Again => 1013,
            BadGateway => 1014,
            Tls => 1015,
            Reserved(code) => code,
            Iana(code) => code,
            Library(code) => code,
            Bad(code) => code,
        }
    }
}

/// Status code and reason of a close handshake.
///
/// This is what a receive loop ends with: the close frame sent by the peer,
/// the close frame this side sent after a protocol violation, or
/// [`CloseResult::abnormal`] when the stream ended without a close frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseResult {
    /// Status code, `None` when the close frame carried no payload.
    pub code: Option<u16>,
    /// UTF-8 reason, possibly empty.
    pub reason: String,
}

impl CloseResult {
    /// A close without status code or reason.
    pub const EMPTY: CloseResult = CloseResult {
        code: None,
        reason: String::new(),
    };

    /// Creates a close result with a status code and reason.
    pub fn new(code: impl Into<u16>, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            reason: reason.into(),
        }
    }

    /// Normal closure (1000) without a reason.
    pub fn normal() -> Self {
        Self::new(CloseCode::Normal, "")
    }

    /// The connection ended without a close handshake (1006).
    ///
    /// Used locally only, never written to the wire.
    pub fn abnormal() -> Self {
        Self::new(CloseCode::Abnormal, "")
    }

    /// Returns the status code as a [`CloseCode`].
    pub fn close_code(&self) -> Option<CloseCode> {
        self.code.map(CloseCode::from)
    }

    /// Returns `true` for the locally generated abnormal closure.
    pub fn is_abnormal(&self) -> bool {
        self.close_code() == Some(CloseCode::Abnormal)
    }

    /// Decodes an already validated close payload.
    ///
    /// An empty payload gives [`CloseResult::EMPTY`].
    pub fn from_payload(payload: &[u8]) -> Self {
        match payload {
            [hi, lo, reason @ ..] => Self {
                code: Some(u16::from_be_bytes([*hi, *lo])),
                reason: String::from_utf8_lossy(reason).into_owned(),
            },
            _ => Self::EMPTY,
        }
    }

    /// Size of the close frame payload this result encodes to.
    pub fn encoded_len(&self) -> usize {
        match self.code {
            Some(_) => 2 + self.reason.len(),
            None => 0,
        }
    }

    /// Writes the close frame payload: the big-endian status code followed by
    /// the reason. Nothing is written when there is no status code.
    pub fn encode(&self, dst: &mut BytesMut) {
        if let Some(code) = self.code {
            dst.put_u16(code);
            dst.put_slice(self.reason.as_bytes());
        }
    }
}

impl fmt::Display for CloseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) if self.reason.is_empty() => write!(f, "{code}"),
            Some(code) => write!(f, "{code} ({})", self.reason),
            None => f.write_str("no status code"),
        }
    }
}
