use crate::AppError;

/// A supported EVM network, identified by its short name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub name: &'static str,
    pub chain_id: u64,
    /// First block worth scanning (protocol deployment height).
    pub start_block: u64,
    /// Blocks covered by one subgraph fetch window.
    pub block_window: u64,
}

// Block windows track block time: fast chains get larger windows.
const NETWORKS: &[Network] = &[
    Network {
        name: "mainnet",
        chain_id: 1,
        start_block: 15_000_000,
        block_window: 1_000,
    },
    Network {
        name: "goerli",
        chain_id: 5,
        start_block: 7_000_000,
        block_window: 1_000,
    },
    Network {
        name: "bsc",
        chain_id: 56,
        start_block: 20_000_000,
        block_window: 5_000,
    },
    Network {
        name: "bsc-testnet",
        chain_id: 97,
        start_block: 20_000_000,
        block_window: 5_000,
    },
    Network {
        name: "polygon",
        chain_id: 137,
        start_block: 30_000_000,
        block_window: 5_000,
    },
    Network {
        name: "mumbai",
        chain_id: 80_001,
        start_block: 26_000_000,
        block_window: 5_000,
    },
];

impl Network {
    /// Look up a network by short name (`bsc`, `mainnet`, `polygon`, ...).
    pub fn by_name(name: &str) -> Result<Network, AppError> {
        let wanted = name.trim().to_ascii_lowercase();
        NETWORKS
            .iter()
            .find(|n| n.name == wanted)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("unsupported network {name:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_networks_resolve() {
        assert_eq!(Network::by_name("bsc").unwrap().chain_id, 56);
        assert_eq!(Network::by_name(" Polygon ").unwrap().chain_id, 137);
        assert_eq!(Network::by_name("MAINNET").unwrap().chain_id, 1);
    }

    #[test]
    fn unknown_network_is_a_config_error() {
        assert!(matches!(
            Network::by_name("solana"),
            Err(AppError::Config(_))
        ));
    }
}
