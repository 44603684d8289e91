pub mod abi;
pub mod decoder;
pub mod provider;

pub use abi::{ERC20, ERC721, ERC1155, MediaProtocol};
pub use decoder::{ContractRole, ContractSet, decode_log};
pub use provider::{create_http_provider, create_ws_provider};
