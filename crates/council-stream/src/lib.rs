//! Conversation stream plumbing: the push transport, the subscription
//! lifecycle with reconnect backoff, and the ordered message ledger.

pub mod backoff;
pub mod connection;
pub mod ledger;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionObserver};
pub use ledger::{Ingested, LedgerEntry, MessageLedger};
pub use transport::{Connector, TransportEvent, TransportSession, WsConnector};
