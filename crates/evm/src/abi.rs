use alloy::sol;

// ─── ERC-20 ─────────────────────────────────────────────────────────────────
sol! {
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    contract ERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}

// ─── NFT Collections ────────────────────────────────────────────────────────
sol! {
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    contract ERC721 {
        event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
    }
}

sol! {
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    contract ERC1155 {
        event TransferSingle(
            address indexed operator,
            address indexed from,
            address indexed to,
            uint256 id,
            uint256 value
        );
    }
}

// ─── Marketplace Protocol ───────────────────────────────────────────────────
sol! {
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    contract MediaProtocol {
        event UserDeposit(address indexed user, address indexed token, uint256 amount);
        event Claim(
            uint256 indexed id,
            address indexed receiver,
            address indexed token,
            uint256 amount
        );
        // `totalStaked` is the running stake of `user` after the call.
        event Staked(address indexed user, address indexed token, uint256 amount, uint256 totalStaked);
        event Unstaked(address indexed user, address indexed token, uint256 amount, uint256 totalStaked);
    }
}
