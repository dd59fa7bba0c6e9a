pub mod diff;
pub mod init;
pub mod serialize;

pub use diff::{diff, DiffArgs};
pub use init::{init, InitArgs};
pub use serialize::{serialize, SerializeArgs};
