//! Clients for the dish compilation scheduler.
//!
//! - **FifoClient**: Talks to a running `dish serve` through its control
//!   FIFOs. This is what an interpreter uses.
//!
//! - **EmbeddedClient**: Runs a scheduler in-process over a memory channel.
//!   Best for embedding and tests.
//!
//! # Example
//!
//! ```ignore
//! use dish_client::{FifoClient, SchedulerClient};
//!
//! let client = FifoClient::with_default_paths();
//! let pid = client.compile("/tmp/p.sh".as_ref(), "/tmp/vars".as_ref(), "/tmp/ir.json".as_ref()).await?;
//! // ... run /tmp/p.sh ...
//! client.exit(pid).await?;
//! client.done().await?;
//! ```

mod embedded;
mod fifo;
mod traits;

pub use embedded::EmbeddedClient;
pub use fifo::FifoClient;
pub use traits::{ClientError, ClientResult, SchedulerClient};
