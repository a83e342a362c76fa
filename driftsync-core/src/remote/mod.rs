/*
    remote - The shared medium: layout, transport seam, backends, crypto

    Everything that touches the medium lives here. The rest of the crate
    only sees the Transport trait and the RemoteLayout path builders.
*/

pub mod crypto;
pub mod folder;
pub mod layout;
pub mod memory;
pub mod transport;

pub use crypto::CryptoManager;
pub use folder::FolderTransport;
pub use layout::RemoteLayout;
pub use memory::MemoryTransport;
pub use transport::{RemoteChange, Transport, TransportError, TransportResult};
