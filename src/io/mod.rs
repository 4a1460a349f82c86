//! Buffered transport: sockets with deadlines, the expected-input read
//! buffer, the one-flush-per-message write buffer, and the connection that
//! ties them together.

pub mod address;
pub mod buffer;
pub mod connection;
pub mod socket;
pub mod tls;

pub use address::{AddressType, IPAddress};
pub use buffer::{FramedReader, InputBuffer, OutputBuffer};
pub use connection::Connection;
pub use socket::{MemorySocket, PlainSocket, TimeoutSocket, Transport};
pub use tls::{TlsConfig, TlsRole, TlsSocket, VerifyMode};
