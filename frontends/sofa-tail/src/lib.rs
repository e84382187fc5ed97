//! `sofa-tail`: follow a CouchDB change feed from the terminal

pub mod args;
pub mod printer;

pub use args::{TailArgs, USAGE};
pub use printer::{format_change, ChangePrinter};
