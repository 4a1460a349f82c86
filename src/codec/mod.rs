//! Wire codec: the parser/formatter pair shared by the server and client
//! roles (each reverses the other's reading/writing direction).

mod chunked;
mod error;
mod formatter;
mod parser;

pub use chunked::{ChunkedDecoder, ChunkedEncoder};
pub use error::DecodeError;
pub use formatter::{Http1Formatter, Payload};
pub use parser::{Http1Parser, ParsedRequest, ParsedResponse, ParserFlags};
