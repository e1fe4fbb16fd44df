//! Currency helpers. All amounts are `Decimal` balboas/dollars with two
//! decimal places.

use rust_decimal::{Decimal, RoundingStrategy};
use crate::ReservationError;

/// Half a cent: two amounts closer than this are the same charge.
pub fn tolerance() -> Decimal {
    Decimal::new(5, 3)
}

pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Rejects zero, negative and sub-cent amounts before they reach a gateway.
pub fn validate_amount(amount: Decimal) -> Result<Decimal, ReservationError> {
    if amount <= Decimal::ZERO {
        return Err(ReservationError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    let normalized = amount.normalize();
    if normalized.scale() > 2 {
        return Err(ReservationError::InvalidAmount(format!(
            "amount {} has more than two decimal places",
            amount
        )));
    }
    Ok(round2(amount))
}

pub fn amounts_match(expected: Decimal, received: Decimal) -> bool {
    (expected - received).abs() < tolerance()
}

pub fn itbms_for(price: Decimal, rate: Decimal) -> Decimal {
    round2(price * rate)
}

/// Formats as a fixed two-decimal string, e.g. `10.7` -> `"10.70"`.
pub fn to_wire(amount: Decimal) -> String {
    format!("{:.2}", round2(amount))
}

pub fn parse(raw: &str) -> Result<Decimal, ReservationError> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|e| ReservationError::InvalidAmount(format!("{}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_amount() {
        assert_eq!(validate_amount(Decimal::new(1000, 2)).unwrap(), Decimal::new(10, 0));
        assert!(validate_amount(Decimal::ZERO).is_err());
        assert!(validate_amount(Decimal::new(-100, 2)).is_err());
        assert!(validate_amount(Decimal::new(10001, 3)).is_err());
        // Trailing zeros are fine
        assert!(validate_amount(Decimal::new(10000, 3)).is_ok());
    }

    #[test]
    fn test_itbms_rounding() {
        let rate = Decimal::new(7, 2);
        assert_eq!(itbms_for(Decimal::new(1000, 2), rate), Decimal::new(70, 2));
        // 3.25 * 0.07 = 0.2275 -> 0.23
        assert_eq!(itbms_for(Decimal::new(325, 2), rate), Decimal::new(23, 2));
    }

    #[test]
    fn test_tolerance() {
        assert!(amounts_match(Decimal::new(1000, 2), Decimal::new(10000, 3)));
        assert!(amounts_match(Decimal::new(1000, 2), Decimal::new(10001, 3)));
        assert!(!amounts_match(Decimal::new(1000, 2), Decimal::new(999, 2)));
    }

    #[test]
    fn test_wire_format() {
        assert_eq!(to_wire(Decimal::new(107, 1)), "10.70");
        assert_eq!(parse(" 9.99 ").unwrap(), Decimal::new(999, 2));
        assert!(parse("ten").is_err());
    }
}
