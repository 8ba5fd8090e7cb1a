//! Built-in connectors.

mod directory;

pub use directory::DirectoryConnector;
