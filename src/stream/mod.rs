//! WebSocket ingestion.
//!
//! One supervised connection per symbol for depth and trades, plus one user
//! data connection whose frames go to every strategy. Sessions reconnect
//! after a fixed delay for as long as the process runs.

mod filter;
mod market;
mod supervisor;
mod user_data;

pub use filter::LastPriceFilter;
pub use market::MarketStream;
pub use supervisor::{connect, supervise, Session, SessionEnd};
pub use user_data::{spawn_listen_key_renewal, UserDataStream};
