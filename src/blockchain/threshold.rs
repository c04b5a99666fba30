use crate::error::ConfigurationError;
use crate::models::{QualifyingTransfer, RawTransfer, TokenAmount, Watcher};

/// Keeps the transfers whose normalized amount is at or above a watcher's threshold
pub struct ThresholdFilter {
    threshold: TokenAmount,
}

impl ThresholdFilter {
    pub fn new(threshold: TokenAmount) -> Self {
        Self { threshold }
    }

    pub fn for_watcher(watcher: &Watcher) -> Result<Self, ConfigurationError> {
        Ok(Self::new(watcher.threshold_amount()?))
    }

    pub fn threshold(&self) -> &TokenAmount {
        &self.threshold
    }

    /// Normalizes `transfer` and returns it if it qualifies (inclusive bound)
    pub fn evaluate(&self, transfer: &RawTransfer) -> Option<QualifyingTransfer> {
        let amount = TokenAmount::from_base_units(transfer.raw_amount, self.threshold.decimals()).ok()?;
        if amount.meets(&self.threshold) {
            Some(QualifyingTransfer {
                transfer: transfer.clone(),
                amount,
            })
        } else {
            None
        }
    }

    pub fn filter(&self, transfers: &[RawTransfer]) -> Vec<QualifyingTransfer> {
        transfers.iter().filter_map(|t| self.evaluate(t)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(raw_amount: u128, tx: &str) -> RawTransfer {
        RawTransfer {
            block_number: 10,
            log_index: 0,
            raw_amount,
            transaction_hash: tx.to_string(),
            from_address: "0x1111111111111111111111111111111111111111".to_string(),
            to_address: "0x2222222222222222222222222222222222222222".to_string(),
        }
    }

    fn one_token_filter() -> ThresholdFilter {
        ThresholdFilter::new(TokenAmount::parse_decimal("1.0", 18).unwrap())
    }

    #[test]
    fn test_amount_equal_to_threshold_qualifies() {
        let filter = one_token_filter();
        let qualifying = filter.evaluate(&transfer(1_000_000_000_000_000_000, "0xeq")).unwrap();
        assert_eq!(qualifying.amount.to_decimal_string(), "1");
    }

    #[test]
    fn test_amount_just_below_threshold_is_discarded() {
        let filter = one_token_filter();
        assert!(filter.evaluate(&transfer(999_999_999_999_999_999, "0xbelow")).is_none());
    }

    #[test]
    fn test_half_token_does_not_qualify() {
        let filter = one_token_filter();
        assert!(filter.evaluate(&transfer(500_000_000_000_000_000, "0xhalf")).is_none());
    }

    #[test]
    fn test_filter_keeps_order_of_qualifying_transfers() {
        let filter = one_token_filter();
        let transfers = vec![
            transfer(2_000_000_000_000_000_000, "0xa"),
            transfer(1, "0xb"),
            transfer(5_000_000_000_000_000_000, "0xc"),
        ];
        let kept: Vec<_> = filter
            .filter(&transfers)
            .into_iter()
            .map(|q| q.transfer.transaction_hash)
            .collect();
        assert_eq!(kept, vec!["0xa", "0xc"]);
    }

    #[test]
    fn test_custom_decimals() {
        // USDC-style 6 decimals: 1000 tokens
        let filter = ThresholdFilter::new(TokenAmount::parse_decimal("1000", 6).unwrap());
        assert!(filter.evaluate(&transfer(1_000_000_000, "0xusdc")).is_some());
        assert!(filter.evaluate(&transfer(999_999_999, "0xusdc2")).is_none());
    }

    #[test]
    fn test_saturated_amount_clears_any_threshold() {
        let filter = ThresholdFilter::new(TokenAmount::parse_decimal("1000000000000000000", 18).unwrap());
        assert!(filter.evaluate(&transfer(u128::MAX, "0xwhale")).is_some());
    }
}
