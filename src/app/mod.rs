pub mod batch;
pub mod server;

pub use batch::{BatchReport, BatchRow, BatchRunner};
pub use server::DigitServer;
