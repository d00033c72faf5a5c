#![forbid(unsafe_code)]

mod connection;
pub mod handler;
pub mod host;

pub use connection::Connection;
pub use handler::handle_connection;
pub use host::HostLink;

/// Engine servido pela porta de controle, com o host remoto como
/// gerenciador de recursos.
pub type ReaperEngine = reaper_engine::Engine<HostLink>;
