use crate::domain::{NativeCurrency, NetworkDescriptor};

pub const BSC_MAINNET_CHAIN_ID: u64 = 56;
pub const BSC_TESTNET_CHAIN_ID: u64 = 97;

struct KnownChain {
    chain_id: u64,
    name: &'static str,
    currency: (&'static str, &'static str, u8),
    rpc_urls: &'static [&'static str],
    explorer_urls: &'static [&'static str],
}

const KNOWN_CHAINS: &[KnownChain] = &[
    KnownChain {
        chain_id: 1,
        name: "Ethereum Mainnet",
        currency: ("Ether", "ETH", 18),
        rpc_urls: &["https://eth.llamarpc.com"],
        explorer_urls: &["https://etherscan.io"],
    },
    KnownChain {
        chain_id: 10,
        name: "OP Mainnet",
        currency: ("Ether", "ETH", 18),
        rpc_urls: &["https://mainnet.optimism.io"],
        explorer_urls: &["https://optimistic.etherscan.io"],
    },
    KnownChain {
        chain_id: BSC_MAINNET_CHAIN_ID,
        name: "BNB Smart Chain Mainnet",
        currency: ("BNB", "BNB", 18),
        rpc_urls: &[
            "https://bsc-dataseed.binance.org",
            "https://bsc-dataseed1.defibit.io",
            "https://bsc-dataseed1.ninicoin.io",
        ],
        explorer_urls: &["https://bscscan.com"],
    },
    KnownChain {
        chain_id: BSC_TESTNET_CHAIN_ID,
        name: "BNB Smart Chain Testnet",
        currency: ("Test BNB", "tBNB", 18),
        rpc_urls: &[
            "https://data-seed-prebsc-1-s1.binance.org:8545",
            "https://data-seed-prebsc-2-s1.binance.org:8545",
        ],
        explorer_urls: &["https://testnet.bscscan.com"],
    },
    KnownChain {
        chain_id: 137,
        name: "Polygon Mainnet",
        currency: ("POL", "POL", 18),
        rpc_urls: &["https://polygon-rpc.com"],
        explorer_urls: &["https://polygonscan.com"],
    },
    KnownChain {
        chain_id: 250,
        name: "Fantom Opera",
        currency: ("Fantom", "FTM", 18),
        rpc_urls: &["https://rpc.ftm.tools"],
        explorer_urls: &["https://ftmscan.com"],
    },
    KnownChain {
        chain_id: 8453,
        name: "Base",
        currency: ("Ether", "ETH", 18),
        rpc_urls: &["https://mainnet.base.org"],
        explorer_urls: &["https://basescan.org"],
    },
    KnownChain {
        chain_id: 42161,
        name: "Arbitrum One",
        currency: ("Ether", "ETH", 18),
        rpc_urls: &["https://arb1.arbitrum.io/rpc"],
        explorer_urls: &["https://arbiscan.io"],
    },
    KnownChain {
        chain_id: 43114,
        name: "Avalanche C-Chain",
        currency: ("Avalanche", "AVAX", 18),
        rpc_urls: &["https://api.avax.network/ext/bc/C/rpc"],
        explorer_urls: &["https://snowtrace.io"],
    },
    KnownChain {
        chain_id: 11155111,
        name: "Sepolia",
        currency: ("Sepolia Ether", "ETH", 18),
        rpc_urls: &["https://rpc.sepolia.org"],
        explorer_urls: &["https://sepolia.etherscan.io"],
    },
];

impl KnownChain {
    fn descriptor(&self) -> NetworkDescriptor {
        let (name, symbol, decimals) = self.currency;
        NetworkDescriptor {
            chain_id: self.chain_id,
            chain_name: self.name.to_owned(),
            native_currency: NativeCurrency {
                name: name.to_owned(),
                symbol: symbol.to_owned(),
                decimals,
            },
            rpc_urls: self.rpc_urls.iter().map(|u| (*u).to_owned()).collect(),
            block_explorer_urls: self.explorer_urls.iter().map(|u| (*u).to_owned()).collect(),
        }
    }
}

pub fn known_chain(chain_id: u64) -> Option<NetworkDescriptor> {
    KNOWN_CHAINS
        .iter()
        .find(|c| c.chain_id == chain_id)
        .map(KnownChain::descriptor)
}

/// The single network this build targets, chosen by the `testnet` feature.
pub fn target_network() -> NetworkDescriptor {
    let chain_id = if cfg!(feature = "testnet") {
        BSC_TESTNET_CHAIN_ID
    } else {
        BSC_MAINNET_CHAIN_ID
    };
    known_chain(chain_id).unwrap_or_else(|| NetworkDescriptor {
        chain_id,
        chain_name: synthesized_name(chain_id),
        native_currency: NativeCurrency {
            name: "BNB".to_owned(),
            symbol: "BNB".to_owned(),
            decimals: 18,
        },
        rpc_urls: Vec::new(),
        block_explorer_urls: Vec::new(),
    })
}

pub fn synthesized_name(chain_id: u64) -> String {
    format!("Chain {chain_id}")
}

/// Parses a chain id in `0x` hex or decimal form.
pub fn parse_chain_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        raw.parse().ok()
    }
}
