//! Conversions between decimal display amounts and integer base units.

use {
    alloy::primitives::{U256, utils::Unit},
    anyhow::{Context, Result, ensure},
    bigdecimal::{
        BigDecimal,
        Zero,
        num_bigint::{BigInt, Sign},
    },
};

/// Decimal exponent of the native currency on every supported network.
pub const NATIVE_DECIMALS: u8 = 18;

/// Largest power of ten that still fits into a `U256` is `10^77`.
const MAX_SHIFT: i64 = 78;

/// Converts a display amount (e.g. `1.5`) into integer base units using the
/// given decimal exponent.
///
/// Fails for negative amounts, for amounts with more fractional digits than
/// `decimals`, and for amounts that overflow 256 bits. The conversion is
/// exact, no floating point is involved.
pub fn to_base_units(amount: &BigDecimal, decimals: u8) -> Result<U256> {
    let (digits, scale) = amount.normalized().as_bigint_and_exponent();
    if digits.is_zero() {
        return Ok(U256::ZERO);
    }
    ensure!(digits.sign() != Sign::Minus, "negative amount {amount}");
    let shift = i64::from(decimals) - scale;
    ensure!(
        shift >= 0,
        "{amount} has more than {decimals} fractional digits"
    );
    ensure!(shift <= MAX_SHIFT, "{amount} does not fit into 256 bits");
    let shift = u32::try_from(shift).context("exponent out of range")?;
    let scaled = digits * BigInt::from(10u8).pow(shift);
    to_u256(&scaled).with_context(|| format!("{amount} does not fit into 256 bits"))
}

/// Converts integer base units back into a normalized display amount.
pub fn from_base_units(value: U256, decimals: u8) -> BigDecimal {
    BigDecimal::new(to_big_int(value), i64::from(decimals)).normalized()
}

fn to_big_int(value: U256) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes::<32>())
}

fn to_u256(value: &BigInt) -> Result<U256> {
    let (sign, bytes) = value.to_bytes_be();
    ensure!(sign != Sign::Minus, "negative value");
    ensure!(bytes.len() <= 32, "value does not fit into 256 bits");
    Ok(U256::from_be_slice(&bytes))
}

pub trait EthUnit: std::marker::Sized {
    /// Returns the current wei amount.
    fn wei(self) -> U256;

    /// Returns the current Eth amount as wei (i.e. 1e18 wei).
    fn eth(self) -> U256 {
        self.wei() * Unit::ETHER.wei()
    }
}

impl EthUnit for u64 {
    fn wei(self) -> U256 {
        U256::from(self)
    }
}

impl EthUnit for u128 {
    fn wei(self) -> U256 {
        U256::from(self)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::str::FromStr};

    fn decimal(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn converts_display_amounts_exactly() {
        assert_eq!(
            to_base_units(&decimal("1.5"), NATIVE_DECIMALS).unwrap(),
            U256::from(1_500_000_000_000_000_000u128)
        );
        assert_eq!(
            to_base_units(&decimal("0.00001"), NATIVE_DECIMALS).unwrap(),
            U256::from(10_000_000_000_000u64)
        );
        assert_eq!(
            to_base_units(&decimal("100"), NATIVE_DECIMALS).unwrap(),
            100u64.eth()
        );
        assert_eq!(
            to_base_units(&decimal("0.000"), NATIVE_DECIMALS).unwrap(),
            U256::ZERO
        );
        // Classic floating point trap, 0.1 + 0.2 must be exactly 0.3.
        assert_eq!(
            to_base_units(&(decimal("0.1") + decimal("0.2")), NATIVE_DECIMALS).unwrap(),
            to_base_units(&decimal("0.3"), NATIVE_DECIMALS).unwrap()
        );
    }

    #[test]
    fn rejects_unrepresentable_amounts() {
        assert!(to_base_units(&decimal("-1"), NATIVE_DECIMALS).is_err());
        assert!(to_base_units(&decimal("0.0000000000000000001"), NATIVE_DECIMALS).is_err());
        assert!(to_base_units(&decimal("1e80"), NATIVE_DECIMALS).is_err());
    }

    #[test]
    fn formats_base_units() {
        assert_eq!(
            from_base_units(U256::from(1_500_000_000_000_000_000u128), NATIVE_DECIMALS),
            decimal("1.5")
        );
        assert_eq!(from_base_units(U256::ZERO, NATIVE_DECIMALS), decimal("0"));
        assert_eq!(from_base_units(U256::from(1), NATIVE_DECIMALS), decimal("1e-18"));
    }

    #[test]
    fn covers_the_full_u256_range() {
        assert_eq!(
            to_base_units(&from_base_units(U256::MAX, NATIVE_DECIMALS), NATIVE_DECIMALS).unwrap(),
            U256::MAX
        );
        let too_large = from_base_units(U256::MAX, 0) + BigDecimal::from(1);
        assert!(to_base_units(&too_large, 0).is_err());
    }
}
