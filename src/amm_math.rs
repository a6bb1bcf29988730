//! Fixed-point AMM math for concentrated-liquidity pools.
//!
//! Pure functions over `U256` with 512-bit intermediates; no I/O. Rounding
//! follows the Uniswap V3 reference discipline: input amounts round up,
//! output amounts round down, so the pool never pays out more than the
//! invariant allows. `sqrt_price_x96_to_price` is the one deliberately lossy
//! function here and must never feed back into swap math.

use crate::errors::EngineError;
use crate::types::TickEntry;
use ethers::types::{U256, U512};

/// 2^96, the sqrt-price fixed-point scale.
pub const Q96: U256 = U256([0, 4294967296, 0, 0]);
/// 2^160, the sqrt-price storage width.
pub const Q160: U256 = U256([0, 0, 4294967296, 0]);
/// Lowest representable sqrt price (tick -887272 boundary).
pub const MIN_SQRT_RATIO: U256 = U256([4295128740, 0, 0, 0]);
/// Highest representable sqrt price (tick 887272 boundary).
pub const MAX_SQRT_RATIO: U256 =
    U256([6743328256752651557, 17280870778742802505, 4294805859, 0]);

pub const MIN_TICK: i32 = -887272;
pub const MAX_TICK: i32 = 887272;

/// Hard bound on tick-walk iterations per simulated swap.
pub const MAX_SWAP_STEPS: usize = 500;

const FEE_DENOMINATOR_PPM: u64 = 1_000_000;

/// `2^128 / 1.0001^(2^i / 2)` for bit `i` of `|tick|`. Multiplying the
/// selected entries together in Q128 reproduces the reference
/// `getSqrtRatioAtTick` exactly at both tick-range boundaries.
const SQRT_RATIO_MULTIPLIERS: [U256; 20] = [
    U256([12262481743371124737, 18445821805675392311, 0, 0]),
    U256([6459403834229662009, 18444899583751176498, 0, 0]),
    U256([17226890335427755467, 18443055278223354162, 0, 0]),
    U256([2032852871939366095, 18439367220385604838, 0, 0]),
    U256([14545316742740207171, 18431993317065449817, 0, 0]),
    U256([5129152022828963007, 18417254355718160513, 0, 0]),
    U256([4894419605888772192, 18387811781193591352, 0, 0]),
    U256([1280255884321894482, 18329067761203520168, 0, 0]),
    U256([15924666964335305635, 18212142134806087854, 0, 0]),
    U256([8010504389359918675, 17980523815641551639, 0, 0]),
    U256([10668036004952895730, 17526086738831147013, 0, 0]),
    U256([4878133418470705624, 16651378430235024244, 0, 0]),
    U256([9537173718739605541, 15030750278693429944, 0, 0]),
    U256([9972618978014552548, 12247334978882834399, 0, 0]),
    U256([10428997489610666742, 8131365268884726200, 0, 0]),
    U256([9305304367709015973, 3584323654723342297, 0, 0]),
    U256([14301143598189091784, 696457651847595233, 0, 0]),
    U256([7393154844743099908, 26294789957452057, 0, 0]),
    U256([2209338891292245655, 37481735321082, 0, 0]),
    U256([10518117631919034274, 76158723, 0, 0]),
];

/// `floor_or_ceil(a * b / denominator)` with a full 512-bit product.
pub fn mul_div(a: U256, b: U256, denominator: U256, round_up: bool) -> Result<U256, EngineError> {
    if denominator.is_zero() {
        return Err(EngineError::InsufficientLiquidity);
    }
    let product: U512 = a.full_mul(b);
    let denom = U512::from(denominator);
    let mut quotient = product / denom;
    if round_up && !(product % denom).is_zero() {
        quotient = quotient + U512::one();
    }
    quotient.try_into().map_err(|_| EngineError::InvalidAmount)
}

fn div_512(numerator: U512, denominator: U512, round_up: bool) -> Result<U256, EngineError> {
    if denominator.is_zero() {
        return Err(EngineError::InsufficientLiquidity);
    }
    let mut quotient = numerator / denominator;
    if round_up && !(numerator % denominator).is_zero() {
        quotient = quotient + U512::one();
    }
    quotient.try_into().map_err(|_| EngineError::InvalidAmount)
}

/// Display price of token0 in token1: `(s / Q96)^2 · 10^(d0 − d1)`.
///
/// Lossy by design; swap math must never consume the result.
pub fn sqrt_price_x96_to_price(sqrt_price_x96: U256, decimals0: u8, decimals1: u8) -> f64 {
    if sqrt_price_x96.is_zero() {
        return 0.0;
    }
    let sqrt = crate::types::conversions::u256_to_f64_lossy(sqrt_price_x96) / 2f64.powi(96);
    sqrt * sqrt * 10f64.powi(decimals0 as i32 - decimals1 as i32)
}

/// V2-equivalent reserves at the current sqrt price: `(L·Q96/s, L·s/Q96)`.
///
/// Display only. Undefined for `s == 0`; `(0, 0)` when `L == 0`.
pub fn virtual_reserves(sqrt_price_x96: U256, liquidity: u128) -> (U256, U256) {
    if liquidity == 0 || sqrt_price_x96.is_zero() {
        return (U256::zero(), U256::zero());
    }
    let l = U256::from(liquidity);
    let r0 = mul_div(l, Q96, sqrt_price_x96, false).unwrap_or_default();
    let r1 = mul_div(l, sqrt_price_x96, Q96, false).unwrap_or_default();
    (r0, r1)
}

/// Next sqrt price after moving `amount` of token0 in (`add`) or out of the
/// range. Rounds up so the price never undershoots the invariant.
pub fn get_next_sqrt_price_from_amount0_rounding_up(
    sqrt_price_x96: U256,
    liquidity: u128,
    amount: U256,
    add: bool,
) -> Result<U256, EngineError> {
    if amount.is_zero() {
        return Ok(sqrt_price_x96);
    }
    if liquidity == 0 {
        return Err(EngineError::InsufficientLiquidity);
    }
    let numerator1: U512 = U512::from(liquidity) << 96;
    let product: U512 = amount.full_mul(sqrt_price_x96);
    let denominator = if add {
        numerator1 + product
    } else {
        if numerator1 <= product {
            return Err(EngineError::InsufficientLiquidity);
        }
        numerator1 - product
    };
    div_512(numerator1 * U512::from(sqrt_price_x96), denominator, true)
}

/// Next sqrt price after moving `amount` of token1. Rounds down.
pub fn get_next_sqrt_price_from_amount1_rounding_down(
    sqrt_price_x96: U256,
    liquidity: u128,
    amount: U256,
    add: bool,
) -> Result<U256, EngineError> {
    if liquidity == 0 {
        return Err(EngineError::InsufficientLiquidity);
    }
    if add {
        let quotient = mul_div(amount, Q96, U256::from(liquidity), false)?;
        sqrt_price_x96
            .checked_add(quotient)
            .ok_or(EngineError::InvalidAmount)
    } else {
        let quotient = mul_div(amount, Q96, U256::from(liquidity), true)?;
        if sqrt_price_x96 <= quotient {
            return Err(EngineError::InsufficientLiquidity);
        }
        Ok(sqrt_price_x96 - quotient)
    }
}

/// Token0 moved between two sqrt prices at constant liquidity:
/// `L·Q96·(sb − sa) / (sb·sa)`.
pub fn get_amount0_delta(
    sqrt_ratio_a_x96: U256,
    sqrt_ratio_b_x96: U256,
    liquidity: u128,
    round_up: bool,
) -> Result<U256, EngineError> {
    let (lo, hi) = sort_ratios(sqrt_ratio_a_x96, sqrt_ratio_b_x96);
    if lo.is_zero() {
        return Err(EngineError::InsufficientLiquidity);
    }
    let numerator1: U512 = U512::from(liquidity) << 96;
    let numerator2 = U512::from(hi - lo);
    let inner = div_512(numerator1 * numerator2, U512::from(hi), round_up)?;
    div_512(U512::from(inner), U512::from(lo), round_up)
}

/// Token1 moved between two sqrt prices at constant liquidity:
/// `L·(sb − sa) / Q96`.
pub fn get_amount1_delta(
    sqrt_ratio_a_x96: U256,
    sqrt_ratio_b_x96: U256,
    liquidity: u128,
    round_up: bool,
) -> Result<U256, EngineError> {
    let (lo, hi) = sort_ratios(sqrt_ratio_a_x96, sqrt_ratio_b_x96);
    mul_div(U256::from(liquidity), hi - lo, Q96, round_up)
}

fn sort_ratios(a: U256, b: U256) -> (U256, U256) {
    if a > b {
        (b, a)
    } else {
        (a, b)
    }
}

/// Exact sqrt ratio at a tick, Q64.96. Input is clamped to the tick range.
pub fn sqrt_ratio_at_tick(tick: i32) -> U256 {
    let t = tick.clamp(MIN_TICK, MAX_TICK);
    let abs_tick = t.unsigned_abs();
    let mut ratio: U512 = U512::one() << 128;
    for (i, multiplier) in SQRT_RATIO_MULTIPLIERS.iter().enumerate() {
        if abs_tick & (1u32 << i) != 0 {
            ratio = (ratio * U512::from(*multiplier)) >> 128;
        }
    }
    if t > 0 {
        ratio = U512::from(U256::max_value()) / ratio;
    }
    // Q128.128 -> Q64.96, rounding up.
    let mask = (U512::one() << 32) - U512::one();
    let mut shifted = ratio >> 32;
    if !(ratio & mask).is_zero() {
        shifted = shifted + U512::one();
    }
    shifted.try_into().unwrap_or(MAX_SQRT_RATIO)
}

/// Largest tick whose sqrt ratio does not exceed `sqrt_price_x96`.
pub fn tick_at_sqrt_ratio(sqrt_price_x96: U256) -> i32 {
    if sqrt_price_x96 <= MIN_SQRT_RATIO {
        return MIN_TICK;
    }
    if sqrt_price_x96 >= MAX_SQRT_RATIO {
        return MAX_TICK;
    }
    let (mut lo, mut hi) = (MIN_TICK, MAX_TICK);
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if sqrt_ratio_at_tick(mid) <= sqrt_price_x96 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

/// `1.0001^tick` as a float, log-domain for extreme ticks.
pub fn tick_to_price(tick: i32) -> f64 {
    let price = 1.0001f64.powi(tick);
    if price.is_finite() && price > 0.0 {
        price
    } else {
        ((tick as f64) * 1.0001f64.ln()).exp()
    }
}

/// Outcome of advancing the price within a single tick range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapStep {
    pub sqrt_price_next_x96: U256,
    pub amount_in: U256,
    pub amount_out: U256,
    pub fee_amount: U256,
}

/// Exact-input step toward `sqrt_ratio_target_x96` at constant liquidity.
/// `fee_ppm` is parts-per-million, charged on the consumed input.
pub fn compute_swap_step(
    sqrt_ratio_current_x96: U256,
    sqrt_ratio_target_x96: U256,
    liquidity: u128,
    amount_remaining: U256,
    fee_ppm: u32,
) -> Result<SwapStep, EngineError> {
    if liquidity == 0 {
        return Err(EngineError::InsufficientLiquidity);
    }
    let zero_for_one = sqrt_ratio_current_x96 >= sqrt_ratio_target_x96;

    let amount_remaining_less_fee = mul_div(
        amount_remaining,
        U256::from(FEE_DENOMINATOR_PPM - fee_ppm as u64),
        U256::from(FEE_DENOMINATOR_PPM),
        false,
    )?;

    let amount_in_to_target = if zero_for_one {
        get_amount0_delta(sqrt_ratio_target_x96, sqrt_ratio_current_x96, liquidity, true)?
    } else {
        get_amount1_delta(sqrt_ratio_current_x96, sqrt_ratio_target_x96, liquidity, true)?
    };

    let (sqrt_price_next_x96, amount_in) = if amount_remaining_less_fee >= amount_in_to_target {
        (sqrt_ratio_target_x96, amount_in_to_target)
    } else {
        let next = if zero_for_one {
            get_next_sqrt_price_from_amount0_rounding_up(
                sqrt_ratio_current_x96,
                liquidity,
                amount_remaining_less_fee,
                true,
            )?
        } else {
            get_next_sqrt_price_from_amount1_rounding_down(
                sqrt_ratio_current_x96,
                liquidity,
                amount_remaining_less_fee,
                true,
            )?
        };
        let consumed = if zero_for_one {
            get_amount0_delta(next, sqrt_ratio_current_x96, liquidity, true)?
        } else {
            get_amount1_delta(sqrt_ratio_current_x96, next, liquidity, true)?
        };
        (next, consumed)
    };

    let amount_out = if zero_for_one {
        get_amount1_delta(sqrt_price_next_x96, sqrt_ratio_current_x96, liquidity, false)?
    } else {
        get_amount0_delta(sqrt_ratio_current_x96, sqrt_price_next_x96, liquidity, false)?
    };

    let fee_amount = if sqrt_price_next_x96 != sqrt_ratio_target_x96 {
        // Partial fill: everything not consumed as principal is fee.
        amount_remaining.saturating_sub(amount_in)
    } else {
        mul_div(
            amount_in,
            U256::from(fee_ppm),
            U256::from(FEE_DENOMINATOR_PPM - fee_ppm as u64),
            true,
        )?
    };

    Ok(SwapStep {
        sqrt_price_next_x96,
        amount_in,
        amount_out,
        fee_amount,
    })
}

/// Concentrated-liquidity state view fed into the multi-tick simulator.
#[derive(Debug, Clone)]
pub struct TickRangeView<'a> {
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub liquidity: u128,
    /// Initialised ticks, strictly sorted ascending.
    pub ticks: &'a [TickEntry],
    /// Parts per million.
    pub fee_ppm: u32,
}

/// Simulates an exact-input swap, crossing initialised ticks as needed.
///
/// Walks at most [`MAX_SWAP_STEPS`] tick ranges and stops early on a partial
/// fill or when crossing drains active liquidity. With no tick data the
/// result degrades to a single-step estimate at the starting liquidity.
pub fn simulate_multi_tick_swap(
    view: &TickRangeView<'_>,
    amount_in: U256,
    zero_for_one: bool,
) -> Result<U256, EngineError> {
    if amount_in.is_zero() {
        return Err(EngineError::InvalidAmount);
    }
    if view.liquidity == 0 {
        return Err(EngineError::InsufficientLiquidity);
    }
    if view.ticks.is_empty() {
        return single_step_estimate(view, amount_in, zero_for_one);
    }

    let mut sqrt_price = view.sqrt_price_x96;
    let mut tick = view.tick;
    let mut liquidity = view.liquidity;
    let mut remaining = amount_in;
    let mut amount_out = U256::zero();

    for _ in 0..MAX_SWAP_STEPS {
        if remaining.is_zero() || liquidity == 0 {
            break;
        }

        let next_initialized = next_initialized_tick(view.ticks, tick, zero_for_one);
        let target = match next_initialized {
            Some(entry) => clamp_sqrt_ratio(sqrt_ratio_at_tick(entry.tick)),
            None => {
                if zero_for_one {
                    MIN_SQRT_RATIO + U256::one()
                } else {
                    MAX_SQRT_RATIO - U256::one()
                }
            }
        };

        let step = compute_swap_step(sqrt_price, target, liquidity, remaining, view.fee_ppm)?;
        remaining = remaining.saturating_sub(step.amount_in + step.fee_amount);
        amount_out = amount_out
            .checked_add(step.amount_out)
            .ok_or(EngineError::InvalidAmount)?;
        sqrt_price = step.sqrt_price_next_x96;

        match next_initialized {
            Some(entry) if sqrt_price == target => {
                // Crossed the boundary: fold in the net liquidity change and
                // step the tick in the travel direction.
                let delta = if zero_for_one {
                    entry.liquidity_net.checked_neg()
                } else {
                    Some(entry.liquidity_net)
                };
                let next_liquidity = delta.and_then(|d| {
                    if d >= 0 {
                        liquidity.checked_add(d as u128)
                    } else {
                        liquidity.checked_sub(d.unsigned_abs())
                    }
                });
                match next_liquidity {
                    Some(l) if l > 0 => liquidity = l,
                    _ => break,
                }
                tick = if zero_for_one { entry.tick - 1 } else { entry.tick };
            }
            // Partial fill inside the current range.
            _ => break,
        }
    }

    Ok(amount_out)
}

fn single_step_estimate(
    view: &TickRangeView<'_>,
    amount_in: U256,
    zero_for_one: bool,
) -> Result<U256, EngineError> {
    let target = if zero_for_one {
        MIN_SQRT_RATIO + U256::one()
    } else {
        MAX_SQRT_RATIO - U256::one()
    };
    let step = compute_swap_step(
        view.sqrt_price_x96,
        target,
        view.liquidity,
        amount_in,
        view.fee_ppm,
    )?;
    Ok(step.amount_out)
}

fn clamp_sqrt_ratio(s: U256) -> U256 {
    let lo = MIN_SQRT_RATIO + U256::one();
    let hi = MAX_SQRT_RATIO - U256::one();
    s.max(lo).min(hi)
}

/// Next initialised tick in the travel direction: `<= current` when swapping
/// token0 for token1 (price falls), `> current` otherwise.
fn next_initialized_tick(
    ticks: &[TickEntry],
    current: i32,
    zero_for_one: bool,
) -> Option<&TickEntry> {
    if zero_for_one {
        let idx = ticks.partition_point(|e| e.tick <= current);
        idx.checked_sub(1).map(|i| &ticks[i])
    } else {
        let idx = ticks.partition_point(|e| e.tick <= current);
        ticks.get(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_e18() -> u128 {
        1_000_000_000_000_000_000
    }

    #[test]
    fn constants_are_bit_exact() {
        assert_eq!(Q96, U256::from(2).pow(U256::from(96)));
        assert_eq!(Q160, U256::from(2).pow(U256::from(160)));
        assert_eq!(
            MAX_SQRT_RATIO,
            U256::from_dec_str("1461446703485210103287273052203988822378723970341").unwrap()
        );
        assert_eq!(MIN_SQRT_RATIO, U256::from(4295128740u64));
    }

    #[test]
    fn sqrt_ratio_at_tick_boundaries() {
        assert_eq!(sqrt_ratio_at_tick(0), Q96);
        // Reference boundary values of the tick range.
        assert_eq!(sqrt_ratio_at_tick(MIN_TICK), U256::from(4295128739u64));
        assert_eq!(
            sqrt_ratio_at_tick(MAX_TICK),
            U256::from_dec_str("1461446703485210103287273052203988822378723970342").unwrap()
        );
    }

    #[test]
    fn tick_round_trips_through_sqrt_ratio() {
        for tick in [-887271, -100_000, -1, 0, 1, 42, 100_000, 887271] {
            let s = sqrt_ratio_at_tick(tick);
            assert_eq!(tick_at_sqrt_ratio(s), tick, "tick {}", tick);
        }
    }

    #[test]
    fn price_of_unity_sqrt_ratio() {
        let p = sqrt_price_x96_to_price(Q96, 18, 18);
        assert!((p - 1.0).abs() < 1e-12);
        // Decimal skew shifts by powers of ten.
        let p = sqrt_price_x96_to_price(Q96, 18, 6);
        assert!((p - 1e12).abs() / 1e12 < 1e-9);
        assert_eq!(sqrt_price_x96_to_price(U256::zero(), 18, 18), 0.0);
    }

    #[test]
    fn virtual_reserves_at_unity() {
        let (r0, r1) = virtual_reserves(Q96, one_e18());
        assert_eq!(r0, U256::from(one_e18()));
        assert_eq!(r1, U256::from(one_e18()));
        assert_eq!(virtual_reserves(Q96, 0), (U256::zero(), U256::zero()));
    }

    #[test]
    fn next_sqrt_price_directions() {
        let s = Q96;
        let amount = U256::from(10u64).pow(U256::from(15u8));
        let up = get_next_sqrt_price_from_amount1_rounding_down(s, one_e18(), amount, true).unwrap();
        assert!(up > s, "adding token1 raises the price");
        let down =
            get_next_sqrt_price_from_amount0_rounding_up(s, one_e18(), amount, true).unwrap();
        assert!(down < s, "adding token0 lowers the price");
    }

    #[test]
    fn next_sqrt_price_zero_liquidity_fails() {
        let err = get_next_sqrt_price_from_amount0_rounding_up(Q96, 0, U256::one(), true);
        assert_eq!(err, Err(EngineError::InsufficientLiquidity));
        let err = get_next_sqrt_price_from_amount1_rounding_down(Q96, 0, U256::one(), false);
        assert_eq!(err, Err(EngineError::InsufficientLiquidity));
    }

    #[test]
    fn amount_deltas_round_against_the_pool() {
        let a = sqrt_ratio_at_tick(-60);
        let b = sqrt_ratio_at_tick(60);
        let down0 = get_amount0_delta(a, b, one_e18(), false).unwrap();
        let up0 = get_amount0_delta(a, b, one_e18(), true).unwrap();
        assert!(up0 >= down0);
        assert!(up0 - down0 <= U256::one());
        let down1 = get_amount1_delta(a, b, one_e18(), false).unwrap();
        let up1 = get_amount1_delta(a, b, one_e18(), true).unwrap();
        assert!(up1 >= down1);
        // Argument order must not matter.
        assert_eq!(get_amount0_delta(b, a, one_e18(), true).unwrap(), up0);
    }

    #[test]
    fn swap_step_charges_fee_on_input() {
        let step = compute_swap_step(
            Q96,
            MIN_SQRT_RATIO + U256::one(),
            one_e18(),
            U256::from(10u64).pow(U256::from(15u8)),
            3000,
        )
        .unwrap();
        assert!(step.amount_out > U256::zero());
        assert!(step.fee_amount > U256::zero());
        // Partial fill: principal + fee accounts for the full input.
        assert_eq!(
            step.amount_in + step.fee_amount,
            U256::from(10u64).pow(U256::from(15u8))
        );
        assert!(step.amount_out < step.amount_in);
    }

    #[test]
    fn multi_tick_swap_without_ticks_estimates_single_step() {
        let view = TickRangeView {
            sqrt_price_x96: Q96,
            tick: 0,
            liquidity: one_e18(),
            ticks: &[],
            fee_ppm: 3000,
        };
        let amount_in = U256::from(10u64).pow(U256::from(15u8));
        let out = simulate_multi_tick_swap(&view, amount_in, true).unwrap();
        assert!(out > U256::zero());
        assert!(out < amount_in);
    }

    #[test]
    fn multi_tick_swap_crosses_and_stops_on_drained_liquidity() {
        // One initialised tick below spot; crossing it downward removes all
        // liquidity, so the swap must terminate with a bounded output.
        let ticks = vec![TickEntry {
            tick: -60,
            liquidity_net: one_e18() as i128,
        }];
        let view = TickRangeView {
            sqrt_price_x96: Q96,
            tick: 0,
            liquidity: one_e18(),
            ticks: &ticks,
            fee_ppm: 3000,
        };
        // Oversized input: only the liquidity above the tick can fill it.
        let huge = U256::from(10u64).pow(U256::from(24u8));
        let out = simulate_multi_tick_swap(&view, huge, true).unwrap();
        assert!(out > U256::zero());
        let range_out = get_amount1_delta(
            sqrt_ratio_at_tick(-60),
            Q96,
            one_e18(),
            false,
        )
        .unwrap();
        assert!(out <= range_out);
    }

    #[test]
    fn multi_tick_swap_crosses_into_deeper_liquidity() {
        // Crossing upward adds liquidity_net, so a second range keeps filling.
        let ticks = vec![
            TickEntry {
                tick: 60,
                liquidity_net: (one_e18() / 2) as i128,
            },
            TickEntry {
                tick: 120,
                liquidity_net: -((one_e18() / 2) as i128),
            },
        ];
        let view = TickRangeView {
            sqrt_price_x96: Q96,
            tick: 0,
            liquidity: one_e18(),
            ticks: &ticks,
            fee_ppm: 500,
        };
        let amount_in = U256::from(10u64).pow(U256::from(16u8));
        let out = simulate_multi_tick_swap(&view, amount_in, false).unwrap();
        assert!(out > U256::zero());
    }

    #[test]
    fn multi_tick_swap_rejects_bad_inputs() {
        let view = TickRangeView {
            sqrt_price_x96: Q96,
            tick: 0,
            liquidity: one_e18(),
            ticks: &[],
            fee_ppm: 3000,
        };
        assert_eq!(
            simulate_multi_tick_swap(&view, U256::zero(), true),
            Err(EngineError::InvalidAmount)
        );
        let empty = TickRangeView {
            liquidity: 0,
            ..view.clone()
        };
        assert_eq!(
            simulate_multi_tick_swap(&empty, U256::one(), true),
            Err(EngineError::InsufficientLiquidity)
        );
    }

    #[test]
    fn mul_div_rounding() {
        let ten = U256::from(10u8);
        let three = U256::from(3u8);
        assert_eq!(mul_div(ten, U256::one(), three, false).unwrap(), three);
        assert_eq!(
            mul_div(ten, U256::one(), three, true).unwrap(),
            U256::from(4u8)
        );
        assert_eq!(
            mul_div(ten, ten, U256::zero(), false),
            Err(EngineError::InsufficientLiquidity)
        );
    }
}
