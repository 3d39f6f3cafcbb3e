//! Rank-to-rank message passing and the collectives built on it.

pub(crate) mod collective;
pub(crate) mod local;
pub(crate) mod transport;

pub use collective::Collective;
pub use local::{LocalCluster, LocalComm, SoloComm};
pub use transport::{Channel, Communicator, Tag};
