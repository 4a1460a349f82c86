//! Blocking HTTP/1.x protocol library.
//!
//! The crate is layered the way the wire works: a buffered, deadline-aware
//! transport ([`io`]), the message grammars and data model ([`protocol`],
//! [`uri`]), the parser/formatter pair ([`codec`]), and the engines that tie a
//! transport to the codec: a thread-pooled [`server`] and a [`client`].

pub mod client;
pub mod codec;
pub mod error;
pub mod io;
pub mod post;
pub mod protocol;
pub mod server;
pub mod uri;

pub use client::{AsyncClient, Client};
pub use codec::{DecodeError, Http1Formatter, Http1Parser, ParserFlags};
pub use error::OperationStatus;
pub use io::{Connection, IPAddress, TlsConfig, VerifyMode};
pub use protocol::{
    Auth, Body, DataMap, Headers, Method, MimeType, Multipart, Protocol, Request, RequestFile,
    Response, SetCookie, Status, StatusCode,
};
pub use server::{Handler, Server};
pub use uri::Uri;

pub type Result<T, E = DecodeError> = std::result::Result<T, E>;
