//! vAMM clearing core simulation.
//!
//! Walks one ETH-PERP market through its life: trading against the curve, margin changes,
//! funding, a liquidation with bad debt, a liquidity migration and the final shutdown.
//! Set `RUST_LOG=vamm_core=debug` to see what the engine logs along the way.

use vamm_core::*;

const ETH_PERP: MarketId = MarketId(1);
const SECOND: i64 = 1_000;

fn main() -> Result<(), EngineError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("vAMM Clearing Core Simulation");
    println!("Single Curve, Isolated Margin, Full Lifecycle\n");

    scenario_1_trading_against_the_curve()?;
    scenario_2_position_lifecycle()?;
    scenario_3_funding()?;
    scenario_4_liquidation_with_bad_debt()?;
    scenario_5_liquidity_migration()?;
    scenario_6_shutdown_and_settlement()?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn usd(amount: i64) -> FixedDecimal {
    FixedDecimal::from_int(amount)
}

// exchange with every trader funded and one block already mined
fn setup(traders: &[AccountId]) -> Result<Engine, EngineError> {
    let config = ExchangeConfig::default();
    let mut engine = config.build_engine(BlockTime::genesis())?;
    for trader in traders {
        engine.mint(config.quote_token.id, *trader, usd(10_000))?;
    }
    engine.advance_time(15 * SECOND);
    Ok(engine)
}

fn quote_token(engine: &Engine) -> Result<TokenId, EngineError> {
    engine
        .market(ETH_PERP)
        .map(|m| m.config.quote_token)
        .ok_or(EngineError::MarketNotFound(ETH_PERP))
}

/// Two traders moving the same curve.
fn scenario_1_trading_against_the_curve() -> Result<(), EngineError> {
    println!("Scenario 1: Trading Against the Curve\n");

    let alice = AccountId(1);
    let bob = AccountId(2);
    let mut engine = setup(&[alice, bob])?;
    println!("  Curve opens at ${}", engine.spot_price(ETH_PERP)?);

    let long = engine.open_position(ETH_PERP, alice, Side::Long, usd(60), usd(10), FixedDecimal::ZERO)?;
    println!(
        "  Alice longs $600: {} ETH, fee ${}, spot now ${}",
        long.exchanged_size, long.fee, long.spot_price_after
    );

    engine.advance_time(15 * SECOND);
    let short = engine.open_position(ETH_PERP, bob, Side::Short, usd(30), usd(5), FixedDecimal::ZERO)?;
    println!(
        "  Bob shorts $150: {} ETH, spot now ${}",
        short.exchanged_size, short.spot_price_after
    );

    let (notional, pnl) =
        engine.position_notional_and_unrealized_pnl(ETH_PERP, alice, PnlCalcOption::SpotPrice)?;
    println!("  Alice's position is worth ${}, pnl ${}\n", notional, pnl);
    Ok(())
}

/// Open, top up, reduce, withdraw and close.
fn scenario_2_position_lifecycle() -> Result<(), EngineError> {
    println!("Scenario 2: Position Lifecycle\n");

    let trader = AccountId(1);
    let mut engine = setup(&[trader])?;
    let token = quote_token(&engine)?;

    engine.open_position(ETH_PERP, trader, Side::Long, usd(100), usd(5), FixedDecimal::ZERO)?;
    let position = engine.position(ETH_PERP, trader)?;
    println!("  Opened {} ETH with ${} margin", position.size, position.margin);

    let margin = engine.add_margin(ETH_PERP, trader, usd(50))?;
    println!("  Added $50, margin ${}", margin);

    engine.advance_time(15 * SECOND);
    let reduced = engine.reduce_position(ETH_PERP, trader, usd(50), usd(2), FixedDecimal::ZERO)?;
    println!(
        "  Reduced by ${}, {} ETH left",
        reduced.exchanged_notional, reduced.position.size
    );

    let free = engine.free_collateral(ETH_PERP, trader)?;
    if free.is_positive() {
        let margin = engine.remove_margin(ETH_PERP, trader, free)?;
        println!("  Withdrew ${} of free collateral, margin ${}", free, margin);
    }

    engine.advance_time(15 * SECOND);
    let closed = engine.close_position(ETH_PERP, trader, FixedDecimal::ZERO)?;
    println!(
        "  Closed, realized ${}, wallet ${}\n",
        closed.realized_pnl,
        engine.balance_of(token, Holder::Trader(trader))?
    );
    Ok(())
}

/// The curve trades above the index, so longs pay.
fn scenario_3_funding() -> Result<(), EngineError> {
    println!("Scenario 3: Funding\n");

    let long_trader = AccountId(1);
    let mut engine = setup(&[long_trader])?;
    engine.open_position(ETH_PERP, long_trader, Side::Long, usd(60), usd(10), FixedDecimal::ZERO)?;

    let mut oracle = MockPriceFeed::new(0);
    oracle.set_price("ETH", usd(10), Timestamp::from_millis(0));
    engine.advance_time(MILLIS_PER_HOUR);

    let before = engine.current_position(ETH_PERP, long_trader)?.margin;
    let result = engine.pay_funding(ETH_PERP, &oracle)?;
    let after = engine.current_position(ETH_PERP, long_trader)?.margin;

    println!(
        "  Curve twap ${} vs index ${}, premium per ETH ${}",
        result.market_twap, result.oracle_twap, result.premium_fraction
    );
    println!("  Long margin ${} -> ${}", before, after);
    println!("  Curve earned ${}, next funding at {}ms\n", result.amm_funding_profit, result.next_funding_time.as_millis());
    Ok(())
}

/// A long wiped out by a short squeeze, closed by a backstop keeper.
fn scenario_4_liquidation_with_bad_debt() -> Result<(), EngineError> {
    println!("Scenario 4: Liquidation With Bad Debt\n");

    let alice = AccountId(1);
    let bob = AccountId(2);
    let keeper = AccountId(3);
    let treasury = AccountId(9);
    let mut engine = setup(&[alice, bob, treasury])?;
    let token = quote_token(&engine)?;
    engine.fund_insurance(token, treasury, usd(5_000))?;
    engine.set_backstop_liquidity_provider(keeper, true);

    engine.open_position(ETH_PERP, alice, Side::Long, usd(60), usd(10), FixedDecimal::ZERO)?;
    engine.advance_time(15 * SECOND);
    engine.open_position(ETH_PERP, bob, Side::Short, usd(20), usd(10), FixedDecimal::ZERO)?;
    engine.advance_time(16 * 60 * SECOND);

    for (trader, status) in engine.liquidatable_accounts(ETH_PERP)? {
        println!("  Trader {} at margin ratio {}", trader.0, status.margin_ratio());
        let result = engine.liquidate(ETH_PERP, trader, keeper)?;
        println!(
            "  Liquidated {} ETH (${}), keeper paid ${}, bad debt ${}",
            result.exchanged_size.abs(),
            result.exchanged_notional,
            result.liquidator_paid,
            result.bad_debt
        );
    }
    println!(
        "  Insurance fund ${}, unresolved debt ${}\n",
        engine.balance_of(token, Holder::InsuranceFund)?,
        engine.unresolved_debt(token)
    );
    Ok(())
}

/// Doubling the curve's depth halves the price impact of the same trade.
fn scenario_5_liquidity_migration() -> Result<(), EngineError> {
    println!("Scenario 5: Liquidity Migration\n");

    let trader = AccountId(1);
    let mut engine = setup(&[trader])?;
    engine.open_position(ETH_PERP, trader, Side::Long, usd(20), usd(5), FixedDecimal::ZERO)?;
    let before = engine.position(ETH_PERP, trader)?;

    let snapshot = engine.migrate_liquidity(ETH_PERP, usd(2))?;
    println!(
        "  Reserves now ${} / {} ETH, spot ${}",
        snapshot.quote_reserve,
        snapshot.base_reserve,
        engine.spot_price(ETH_PERP)?
    );

    let after = engine.adjust_position_for_liquidity_changed(ETH_PERP, trader)?;
    println!(
        "  Position {} ETH -> {} ETH, open notional ${} unchanged\n",
        before.size, after.size, after.open_notional
    );
    Ok(())
}

/// Shutdown fixes one price; everyone settles against it.
fn scenario_6_shutdown_and_settlement() -> Result<(), EngineError> {
    println!("Scenario 6: Shutdown and Settlement\n");

    let traders = [AccountId(1), AccountId(2), AccountId(3)];
    let mut engine = setup(&traders)?;
    let token = quote_token(&engine)?;

    let sides = [Side::Long, Side::Short, Side::Long];
    for (trader, side) in traders.iter().zip(sides) {
        engine.open_position(ETH_PERP, *trader, side, usd(40), usd(3), FixedDecimal::ZERO)?;
        engine.advance_time(15 * SECOND);
    }

    let price = engine.shutdown_market(ETH_PERP)?;
    println!("  Market shut down at ${}", price);

    for trader in traders {
        let settled = engine.settle_position(ETH_PERP, trader)?;
        println!(
            "  Trader {} settled: value ${}, paid ${}",
            trader.0, settled.value, settled.paid
        );
    }
    println!("  Vault left with ${}", engine.balance_of(token, Holder::Vault)?);
    println!("  Events generated: {}", engine.events().len());
    Ok(())
}
