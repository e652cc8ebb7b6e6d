use crate::models::{Asset, FundingCurrency};

/// How much to spend on a single run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AmountSpec {
    /// Fixed amount in the funding currency, capped at available balance.
    Absolute(f64),
    /// Fraction of available balance, in [0, 1].
    BalanceFraction(f64),
    /// Buy exactly the asset's minimum tradable quantity.
    MinimumOnly,
}

/// One immutable trading instruction. Created per invocation: scheduled,
/// manual, or dispatched from a confirmed command.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeInstruction {
    pub asset: Asset,
    pub funding: FundingCurrency,
    pub amount: AmountSpec,
    pub min_quantity: f64,
}

impl TradeInstruction {
    pub fn new(asset: Asset, funding: FundingCurrency, amount: AmountSpec) -> Self {
        Self {
            asset,
            funding,
            amount,
            min_quantity: asset.min_quantity(),
        }
    }

    /// Override the asset's default minimum, used when the configured
    /// minimum for the scheduled asset differs from the table default.
    pub fn with_min_quantity(mut self, min_quantity: f64) -> Self {
        self.min_quantity = min_quantity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Currency;

    #[test]
    fn instruction_carries_asset_minimum() {
        let ins = TradeInstruction::new(
            Asset::Btc,
            FundingCurrency::Fixed(Currency::Eur),
            AmountSpec::BalanceFraction(0.2),
        );
        assert_eq!(ins.min_quantity, Asset::Btc.min_quantity());
    }

    #[test]
    fn min_quantity_override() {
        let ins = TradeInstruction::new(
            Asset::Btc,
            FundingCurrency::Auto,
            AmountSpec::MinimumOnly,
        )
        .with_min_quantity(0.0005);
        assert_eq!(ins.min_quantity, 0.0005);
    }
}
