mod common;

use ethers::abi::Token;
use ethers::types::{H160, U256};
use tokio_util::sync::CancellationToken;

use common::*;
use swapcycle::common::abi::Abi;
use swapcycle::common::chain::ChainError;
use swapcycle::common::execution::CallKind;
use swapcycle::common::utils::Pacing;
use swapcycle::cycle::config::{
    AmountRange, LiquidityAmount, OperationKind, RunConfig, TokenSelection, UnswapAmount,
};
use swapcycle::cycle::operations::{Operations, Venue};
use swapcycle::cycle::pipeline::{
    AccountTask, OperationOutcome, Percent, PipelineError, INSUFFICIENT_BALANCE,
};
use swapcycle::cycle::scheduler::ScheduleMode;

fn router() -> H160 {
    H160::from_low_u64_be(0x10)
}

fn weth() -> H160 {
    H160::from_low_u64_be(0x20)
}

fn token() -> H160 {
    H160::from_low_u64_be(0x30)
}

fn lp() -> H160 {
    H160::from_low_u64_be(0x40)
}

fn operations(chain: &MockChain) -> Operations {
    let selection = TokenSelection {
        symbol: "TKN".to_string(),
        token: token(),
        lp_token: lp(),
    };
    let operation = OperationKind::Swap {
        amount: AmountRange::fixed(0.1).unwrap(),
    };
    let mut config = RunConfig::new(operation, selection, ScheduleMode::SinglePass)
        .unwrap()
        .with_pacing(Pacing::none(), Pacing::secs(5, 10), Pacing::none());
    config.router = router();
    config.wrapped_native = weth();
    Operations::new(Venue::from_config(&config), chain.submitter(Some(25)), &config)
}

fn quote(chain: &MockChain, amount_in: U256, amount_out: U256) {
    chain.respond(
        router(),
        &Abi::new().router,
        "getAmountsOut",
        vec![Token::Array(vec![Token::Uint(amount_in), Token::Uint(amount_out)])],
    );
}

fn token_balance(chain: &MockChain, token: H160, balance: U256) {
    chain.respond(token, &Abi::new().token, "balanceOf", vec![Token::Uint(balance)]);
}

/// 200 LP out of 1000, pool holding 400 wrapped native (token0) and 800 token.
fn seed_pool(chain: &MockChain) {
    let abi = Abi::new();
    token_balance(chain, lp(), units(200, 0));
    chain.respond(lp(), &abi.token, "totalSupply", vec![Token::Uint(units(1_000, 0))]);
    chain.respond(
        lp(),
        &abi.pair,
        "getReserves",
        vec![
            Token::Uint(units(400, 0)),
            Token::Uint(units(800, 0)),
            Token::Uint(U256::from(1_700_000_000u64)),
        ],
    );
    chain.respond(lp(), &abi.pair, "token0", vec![Token::Address(weth())]);
    chain.respond(lp(), &abi.pair, "token1", vec![Token::Address(token())]);
}

fn hundredths(n: u64) -> U256 {
    U256::exp10(16) * U256::from(n)
}

#[tokio::test(start_paused = true)]
async fn swap_with_insufficient_balance_is_skipped_without_submitting() {
    let chain = MockChain::new();
    let signer = account(KEY_0, 0);
    chain.set_balance(signer.address, hundredths(5));
    quote(&chain, units(0, 1), units(20, 0));

    let outcome = operations(&chain)
        .swap(AmountRange::fixed(0.1).unwrap())
        .run(&signer, &CancellationToken::new())
        .await;

    match outcome {
        OperationOutcome::Skipped(reason) => assert_eq!(reason, INSUFFICIENT_BALANCE),
        other => panic!("expected a skip, got {:?}", other),
    }
    assert_eq!(chain.broadcast_count(), 0);
    assert_eq!(chain.nonce_reads(), 0);
}

#[tokio::test(start_paused = true)]
async fn swap_sends_value_with_slippage_minimum() {
    let chain = MockChain::new();
    let signer = account(KEY_0, 0);
    chain.set_balance(signer.address, units(1, 0));
    quote(&chain, units(0, 1), units(20, 0));
    chain.accept_mined(hash(1));

    let outcome = operations(&chain)
        .swap(AmountRange::fixed(0.1).unwrap())
        .run(&signer, &CancellationToken::new())
        .await;

    let confirmed = match outcome {
        OperationOutcome::Success(confirmed) => confirmed,
        other => panic!("expected success, got {:?}", other),
    };
    assert_eq!(confirmed.hash, hash(1));
    assert_eq!(confirmed.kind, CallKind::SwapExactEthForTokens);

    let sent = chain.broadcasts();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to_addr(), Some(&router()));
    assert_eq!(sent[0].value(), Some(&units(0, 1)));
    let function = Abi::new()
        .router
        .abi()
        .function("swapExactETHForTokens")
        .unwrap()
        .clone();
    let args = function.decode_input(&sent[0].data().unwrap()[4..]).unwrap();
    // 20 * 0.995
    assert_eq!(args[0], Token::Uint(units(19, 9)));
    assert_eq!(args[3], Token::Uint(U256::from(1_700_000_300u64)));
}

#[tokio::test(start_paused = true)]
async fn failed_precondition_on_first_step_submits_nothing() {
    let chain = MockChain::new();
    let signer = account(KEY_0, 0);
    quote(&chain, units(10, 0), units(0, 5));
    token_balance(&chain, token(), units(3, 0));

    let outcome = operations(&chain)
        .unswap(UnswapAmount::Range(AmountRange::fixed(10.0).unwrap()))
        .run(&signer, &CancellationToken::new())
        .await;

    assert!(matches!(outcome, OperationOutcome::Skipped(ref r) if r == INSUFFICIENT_BALANCE));
    assert_eq!(chain.broadcast_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn unswap_approves_then_swaps() {
    let chain = MockChain::new();
    let signer = account(KEY_0, 0);
    quote(&chain, units(10, 0), units(0, 5));
    token_balance(&chain, token(), units(50, 0));
    chain.accept_mined(hash(1));
    chain.accept_mined(hash(2));

    let outcome = operations(&chain)
        .unswap(UnswapAmount::Range(AmountRange::fixed(10.0).unwrap()))
        .run(&signer, &CancellationToken::new())
        .await;

    match outcome {
        OperationOutcome::Success(confirmed) => {
            assert_eq!(confirmed.hash, hash(2));
            assert_eq!(confirmed.kind, CallKind::SwapExactTokensForEth);
        }
        other => panic!("expected success, got {:?}", other),
    }
    let sent = chain.broadcasts();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].to_addr(), Some(&token()));
    assert_eq!(sent[0].gas(), Some(&U256::from(120_000u64)));
    assert_eq!(sent[1].to_addr(), Some(&router()));
    assert_eq!(sent[1].gas(), Some(&U256::from(270_000u64)));
    // the swap used the nonce after the approve
    assert_eq!(sent[1].nonce(), Some(&U256::one()));
}

#[tokio::test(start_paused = true)]
async fn failed_approve_stops_the_pipeline() {
    let chain = MockChain::new();
    let signer = account(KEY_0, 0);
    quote(&chain, units(10, 0), units(0, 5));
    token_balance(&chain, token(), units(50, 0));
    chain.script_send(SendScript::Reject(ChainError::Reverted(
        "execution reverted".to_string(),
    )));

    let outcome = operations(&chain)
        .unswap(UnswapAmount::Range(AmountRange::fixed(10.0).unwrap()))
        .run(&signer, &CancellationToken::new())
        .await;

    match outcome {
        OperationOutcome::Fatal(PipelineError::Submit { step, source }) => {
            assert_eq!(step, "approve");
            assert!(!source.is_transient_infrastructure());
        }
        other => panic!("expected a fatal approve, got {:?}", other),
    }
    assert_eq!(chain.broadcast_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn quote_failures_skip_unless_the_node_is_unavailable() {
    let chain = MockChain::new();
    let signer = account(KEY_0, 0);
    chain.set_balance(signer.address, units(1, 0));
    let abi = Abi::new();
    let ops = operations(&chain);

    chain.fail_call(
        router(),
        &abi.router,
        "getAmountsOut",
        ChainError::Reverted("UniswapV2Library: INSUFFICIENT_LIQUIDITY".to_string()),
    );
    let outcome = ops
        .swap(AmountRange::fixed(0.1).unwrap())
        .run(&signer, &CancellationToken::new())
        .await;
    assert!(matches!(outcome, OperationOutcome::Skipped(_)));

    chain.fail_call(
        router(),
        &abi.router,
        "getAmountsOut",
        ChainError::Unavailable("header not found".to_string()),
    );
    let outcome = ops
        .swap(AmountRange::fixed(0.1).unwrap())
        .run(&signer, &CancellationToken::new())
        .await;
    match outcome {
        OperationOutcome::Fatal(err) => assert!(err.is_transient_infrastructure()),
        other => panic!("expected a fatal read, got {:?}", other),
    }

    quote(&chain, units(0, 1), U256::zero());
    let outcome = ops
        .swap(AmountRange::fixed(0.1).unwrap())
        .run(&signer, &CancellationToken::new())
        .await;
    assert!(matches!(outcome, OperationOutcome::Skipped(_)));
    assert_eq!(chain.broadcast_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn remove_liquidity_minimums_follow_reserves() {
    let chain = MockChain::new();
    let signer = account(KEY_0, 0);
    let abi = Abi::new();
    seed_pool(&chain);
    chain.accept_mined(hash(1));
    chain.accept_mined(hash(2));

    let outcome = operations(&chain)
        .remove_liquidity(LiquidityAmount::Share(Percent::from_percent(50.0).unwrap()))
        .run(&signer, &CancellationToken::new())
        .await;
    assert!(outcome.is_success(), "{:?}", outcome);

    let sent = chain.broadcasts();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].to_addr(), Some(&lp()));

    let approve = abi.token.abi().function("approve").unwrap().clone();
    let args = approve.decode_input(&sent[0].data().unwrap()[4..]).unwrap();
    assert_eq!(args[1], Token::Uint(units(100, 0)));

    let remove = abi.router.abi().function("removeLiquidityETH").unwrap().clone();
    let args = remove.decode_input(&sent[1].data().unwrap()[4..]).unwrap();
    assert_eq!(args[0], Token::Address(token()));
    assert_eq!(args[1], Token::Uint(units(100, 0)));
    assert_eq!(args[2], Token::Uint(units(79, 6)));
    assert_eq!(args[3], Token::Uint(units(39, 8)));
    assert_eq!(args[4], Token::Address(signer.address));
}

#[tokio::test(start_paused = true)]
async fn remove_liquidity_without_lp_is_skipped() {
    let chain = MockChain::new();
    let signer = account(KEY_0, 0);
    token_balance(&chain, lp(), U256::zero());

    let outcome = operations(&chain)
        .remove_liquidity(LiquidityAmount::Share(Percent::from_percent(50.0).unwrap()))
        .run(&signer, &CancellationToken::new())
        .await;

    assert!(matches!(outcome, OperationOutcome::Skipped(_)));
    assert_eq!(chain.broadcast_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn add_liquidity_needs_both_balances() {
    let chain = MockChain::new();
    let signer = account(KEY_0, 0);
    chain.set_balance(signer.address, units(1, 0));
    quote(&chain, hundredths(5), units(10, 0));
    token_balance(&chain, token(), units(9, 0));

    let ops = operations(&chain);
    let outcome = ops
        .add_liquidity(AmountRange::fixed(0.05).unwrap())
        .run(&signer, &CancellationToken::new())
        .await;
    assert!(matches!(outcome, OperationOutcome::Skipped(ref r) if r == INSUFFICIENT_BALANCE));
    assert_eq!(chain.broadcast_count(), 0);

    token_balance(&chain, token(), units(10, 0));
    chain.accept_mined(hash(1));
    chain.accept_mined(hash(2));
    let outcome = ops
        .add_liquidity(AmountRange::fixed(0.05).unwrap())
        .run(&signer, &CancellationToken::new())
        .await;
    assert!(outcome.is_success(), "{:?}", outcome);

    let sent = chain.broadcasts();
    assert_eq!(sent[1].value(), Some(&hundredths(5)));
    let add = Abi::new().router.abi().function("addLiquidityETH").unwrap().clone();
    let args = add.decode_input(&sent[1].data().unwrap()[4..]).unwrap();
    assert_eq!(args[1], Token::Uint(units(10, 0)));
    assert_eq!(args[2], Token::Uint(hundredths(995)));
}

#[tokio::test(start_paused = true)]
async fn swap_unswap_sells_a_share_of_the_quote() {
    let chain = MockChain::new();
    let signer = account(KEY_0, 0);
    chain.set_balance(signer.address, units(1, 0));
    quote(&chain, units(0, 1), units(20, 0));
    token_balance(&chain, token(), units(20, 0));
    chain.accept_mined(hash(1));
    chain.accept_mined(hash(2));
    chain.accept_mined(hash(3));

    let outcome = operations(&chain)
        .swap_unswap(
            AmountRange::fixed(0.1).unwrap(),
            Percent::from_percent(25.0).unwrap(),
        )
        .run(&signer, &CancellationToken::new())
        .await;

    match outcome {
        OperationOutcome::Success(confirmed) => assert_eq!(confirmed.hash, hash(3)),
        other => panic!("expected success, got {:?}", other),
    }
    let sent = chain.broadcasts();
    let approve = Abi::new().token.abi().function("approve").unwrap().clone();
    let args = approve.decode_input(&sent[1].data().unwrap()[4..]).unwrap();
    assert_eq!(args[1], Token::Uint(units(5, 0)));
}

#[tokio::test(start_paused = true)]
async fn follow_up_skip_does_not_fail_the_cycle() {
    let chain = MockChain::new();
    let signer = account(KEY_0, 0);
    chain.set_balance(signer.address, units(1, 0));
    quote(&chain, units(0, 1), units(20, 0));
    token_balance(&chain, token(), U256::zero());
    chain.accept_mined(hash(1));

    let outcome = operations(&chain)
        .swap_unswap(
            AmountRange::fixed(0.1).unwrap(),
            Percent::from_percent(50.0).unwrap(),
        )
        .run(&signer, &CancellationToken::new())
        .await;

    match outcome {
        OperationOutcome::Success(confirmed) => assert_eq!(confirmed.hash, hash(1)),
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(chain.broadcast_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn skipped_gate_runs_no_follow_ups() {
    let chain = MockChain::new();
    let signer = account(KEY_0, 0);
    quote(&chain, units(0, 1), units(20, 0));

    let outcome = operations(&chain)
        .full_cycle(
            AmountRange::fixed(0.1).unwrap(),
            Percent::from_percent(50.0).unwrap(),
            AmountRange::fixed(0.05).unwrap(),
            Percent::from_percent(50.0).unwrap(),
        )
        .run(&signer, &CancellationToken::new())
        .await;

    assert!(matches!(outcome, OperationOutcome::Skipped(ref r) if r == INSUFFICIENT_BALANCE));
    assert_eq!(chain.calls_to(token()), 0);
    assert_eq!(chain.calls_to(lp()), 0);
    assert_eq!(chain.broadcast_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn follow_up_node_failure_is_returned_for_retry() {
    let chain = MockChain::new();
    let signer = account(KEY_0, 0);
    chain.set_balance(signer.address, units(1, 0));
    quote(&chain, units(0, 1), units(20, 0));
    chain.fail_call(
        token(),
        &Abi::new().token,
        "balanceOf",
        ChainError::Unavailable("missing trie node".to_string()),
    );
    chain.accept_mined(hash(1));

    let outcome = operations(&chain)
        .swap_unswap(
            AmountRange::fixed(0.1).unwrap(),
            Percent::from_percent(50.0).unwrap(),
        )
        .run(&signer, &CancellationToken::new())
        .await;

    match outcome {
        OperationOutcome::Fatal(err) => assert!(err.is_transient_infrastructure()),
        other => panic!("expected a transient failure, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn full_cycle_runs_all_four_operations() {
    let chain = MockChain::new();
    let signer = account(KEY_0, 0);
    chain.set_balance(signer.address, units(1, 0));
    quote(&chain, units(0, 1), units(20, 0));
    token_balance(&chain, token(), units(20, 0));
    seed_pool(&chain);
    for n in 1..=7 {
        chain.accept_mined(hash(n));
    }

    let outcome = operations(&chain)
        .full_cycle(
            AmountRange::fixed(0.1).unwrap(),
            Percent::from_percent(50.0).unwrap(),
            AmountRange::fixed(0.05).unwrap(),
            Percent::from_percent(50.0).unwrap(),
        )
        .run(&signer, &CancellationToken::new())
        .await;

    match outcome {
        OperationOutcome::Success(confirmed) => {
            assert_eq!(confirmed.hash, hash(7));
            assert_eq!(confirmed.kind, CallKind::RemoveLiquidityEth);
        }
        other => panic!("expected success, got {:?}", other),
    }
    let targets: Vec<_> = chain
        .broadcasts()
        .iter()
        .map(|tx| *tx.to_addr().unwrap())
        .collect();
    // swap, approve + unswap, approve + add, approve LP + remove
    assert_eq!(
        targets,
        vec![router(), token(), router(), token(), router(), lp(), router()]
    );
}

#[tokio::test(start_paused = true)]
async fn skipped_unswap_still_runs_liquidity_operations() {
    let chain = MockChain::new();
    let signer = account(KEY_0, 0);
    chain.set_balance(signer.address, units(1, 0));
    quote(&chain, units(0, 1), units(20, 0));
    token_balance(&chain, token(), units(20, 0));
    seed_pool(&chain);
    for n in 1..=5 {
        chain.accept_mined(hash(n));
    }

    let outcome = operations(&chain)
        .full_cycle(
            AmountRange::fixed(0.1).unwrap(),
            Percent::ZERO,
            AmountRange::fixed(0.05).unwrap(),
            Percent::from_percent(50.0).unwrap(),
        )
        .run(&signer, &CancellationToken::new())
        .await;

    match outcome {
        OperationOutcome::Success(confirmed) => assert_eq!(confirmed.hash, hash(5)),
        other => panic!("expected success, got {:?}", other),
    }
    let sent = chain.broadcasts();
    assert_eq!(sent.len(), 5);
    let add = Abi::new().router.abi().function("addLiquidityETH").unwrap().clone();
    let args = add.decode_input(&sent[2].data().unwrap()[4..]).unwrap();
    assert_eq!(args[1], Token::Uint(units(20, 0)));
}

#[tokio::test(start_paused = true)]
async fn cancellation_reaches_an_unanswered_balance_read() {
    let chain = MockChain::new();
    let signer = account(KEY_0, 0);
    quote(&chain, units(0, 1), units(20, 0));
    chain.stall_balances();
    let cancel = CancellationToken::new();

    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        stopper.cancel();
    });
    let outcome = operations(&chain)
        .swap(AmountRange::fixed(0.1).unwrap())
        .run(&signer, &cancel)
        .await;

    assert!(matches!(outcome, OperationOutcome::Fatal(PipelineError::Cancelled)));
    assert_eq!(chain.broadcast_count(), 0);
}
