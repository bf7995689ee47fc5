/// Module for managing and providing contract ABI (Application Binary Interface) definitions.
///
/// Contains the `Abi` struct, which holds pre-parsed contract ABIs for use throughout the application.
use ethers::abi::{parse_abi, Detokenize, Tokenize};
use ethers::prelude::BaseContract;
use ethers::types::{H160, U256};

use crate::common::chain::{ChainClient, ChainError, ChainResult};

/// Holds parsed contract ABIs for the router, ERC-20 tokens and pair contracts.
///
/// - `router`: UniswapV2-style router (swaps, liquidity, `getAmountsOut`).
/// - `token`: ERC-20 token contract (`balanceOf`, `approve`, `totalSupply`).
/// - `pair`: pair contract (`token0`, `token1`, `getReserves`).
#[derive(Clone, Debug)]
pub struct Abi {
    /// Router contract ABI
    pub router: BaseContract,
    /// ERC-20 token contract ABI; LP tokens are ERC-20s too
    pub token: BaseContract,
    /// Pair contract ABI, with `token0()`, `token1()`, and `getReserves()`
    pub pair: BaseContract,
}

impl Abi {
    /// Creates a new `Abi` instance with pre-parsed contract ABIs.
    ///
    /// # Panics
    /// Panics if any ABI parsing fails (should not happen with hardcoded ABIs).
    pub fn new() -> Self {
        let router = BaseContract::from(
            parse_abi(&[
                "function getAmountsOut(uint256,address[]) external view returns (uint256[])",
                "function swapExactETHForTokens(uint256,address[],address,uint256) external payable returns (uint256[])",
                "function swapExactTokensForETH(uint256,uint256,address[],address,uint256) external returns (uint256[])",
                "function addLiquidityETH(address,uint256,uint256,uint256,address,uint256) external payable returns (uint256,uint256,uint256)",
                "function removeLiquidityETH(address,uint256,uint256,uint256,address,uint256) external returns (uint256,uint256)",
            ])
            .unwrap(),
        );

        let token = BaseContract::from(
            parse_abi(&[
                "function balanceOf(address) external view returns (uint256)",
                "function totalSupply() external view returns (uint256)",
                "function approve(address,uint256) external returns (bool)",
            ])
            .unwrap(),
        );

        let pair = BaseContract::from(
            parse_abi(&[
                "function token0() external view returns (address)",
                "function token1() external view returns (address)",
                "function getReserves() external view returns (uint112,uint112,uint32)",
            ])
            .unwrap(),
        );

        Self {
            router,
            token,
            pair,
        }
    }
}

impl Abi {
    /// Encodes `name(args)`, runs it as an `eth_call` against `to` and decodes the output.
    async fn read<T: Detokenize + Send>(
        &self,
        chain: &dyn ChainClient,
        contract: &BaseContract,
        to: H160,
        name: &str,
        args: impl Tokenize + Send,
    ) -> ChainResult<T> {
        let data = contract
            .encode(name, args)
            .map_err(|e| ChainError::Malformed(format!("{}: {}", name, e)))?;
        let output = chain.call(to, data).await?;
        contract
            .decode_output(name, output)
            .map_err(|e| ChainError::Malformed(format!("{}: {}", name, e)))
    }

    /// ERC-20 balance of `owner`.
    pub async fn balance_of(
        &self,
        chain: &dyn ChainClient,
        token: H160,
        owner: H160,
    ) -> ChainResult<U256> {
        self.read(chain, &self.token, token, "balanceOf", owner).await
    }

    pub async fn total_supply(&self, chain: &dyn ChainClient, token: H160) -> ChainResult<U256> {
        self.read(chain, &self.token, token, "totalSupply", ()).await
    }

    /// Router quote for `amount_in` along `path`; one amount per hop.
    pub async fn amounts_out(
        &self,
        chain: &dyn ChainClient,
        router: H160,
        amount_in: U256,
        path: Vec<H160>,
    ) -> ChainResult<Vec<U256>> {
        self.read(chain, &self.router, router, "getAmountsOut", (amount_in, path))
            .await
    }

    /// Pair reserves as (reserve0, reserve1).
    pub async fn reserves(&self, chain: &dyn ChainClient, pair: H160) -> ChainResult<(U256, U256)> {
        let (reserve0, reserve1, _last): (U256, U256, U256) =
            self.read(chain, &self.pair, pair, "getReserves", ()).await?;
        Ok((reserve0, reserve1))
    }

    /// Pair token ordering as (token0, token1).
    pub async fn pair_tokens(&self, chain: &dyn ChainClient, pair: H160) -> ChainResult<(H160, H160)> {
        let token0: H160 = self.read(chain, &self.pair, pair, "token0", ()).await?;
        let token1: H160 = self.read(chain, &self.pair, pair, "token1", ()).await?;
        Ok((token0, token1))
    }
}

impl Default for Abi {
    fn default() -> Self {
        Self::new()
    }
}
