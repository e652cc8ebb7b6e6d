use thiserror::Error;

use crate::models::{Asset, Currency};

/// An amount argument as entered by the operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AmountArg {
    /// Bare number: absolute amount in the funding currency.
    Absolute(f64),
    /// `N%`: percentage of the available balance, as entered (0, 100].
    Percent(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Buy {
        asset: Asset,
        amount: Option<AmountArg>,
        currency: Option<Currency>,
    },
    Confirm,
    ConfirmEur,
    ConvertEur {
        amount: Option<f64>,
    },
    Enable,
    Disable,
    Status,
    Balance,
    Price,
    History,
    Help,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("Unknown command '{0}'. Send 'help' for the command list.")]
    UnknownCommand(String),
    #[error("Bad amount '{0}'. Use a number like 25, or a percentage like 20%.")]
    BadAmount(String),
    #[error("Bad currency '{0}'. Supported: EUR, USDC.")]
    BadCurrency(String),
    #[error("Empty command.")]
    Empty,
}

/// Parse one command line: space-separated tokens, optional leading `/` and
/// `@botname` suffix as sent by Telegram clients.
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let mut tokens = line.split_whitespace();
    let head = tokens.next().ok_or(ParseError::Empty)?;
    let head = head.trim_start_matches('/').to_ascii_lowercase();
    let head = head.split('@').next().unwrap_or("").to_string();

    let command = match head.as_str() {
        "confirm" => Command::Confirm,
        "confirm_eur" => Command::ConfirmEur,
        "convert_eur" => {
            let amount = match tokens.next() {
                Some(token) => Some(parse_plain_amount(token)?),
                None => None,
            };
            Command::ConvertEur { amount }
        }
        "enable" => Command::Enable,
        "disable" => Command::Disable,
        "status" => Command::Status,
        "balance" => Command::Balance,
        "price" => Command::Price,
        "history" => Command::History,
        "help" | "start" => Command::Help,
        h if h.starts_with("buy") => {
            let asset = Asset::from_command_suffix(&h[3..])
                .ok_or_else(|| ParseError::UnknownCommand(head.clone()))?;
            let amount = match tokens.next() {
                Some(token) => Some(parse_amount(token)?),
                None => None,
            };
            let currency = match tokens.next() {
                Some(token) => {
                    Some(Currency::parse(token).ok_or_else(|| {
                        ParseError::BadCurrency(token.to_string())
                    })?)
                }
                None => None,
            };
            Command::Buy {
                asset,
                amount,
                currency,
            }
        }
        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };

    Ok(command)
}

fn parse_amount(token: &str) -> Result<AmountArg, ParseError> {
    if let Some(stripped) = token.strip_suffix('%') {
        let percent: f64 = stripped
            .parse()
            .map_err(|_| ParseError::BadAmount(token.to_string()))?;
        if !(percent > 0.0 && percent <= 100.0) {
            return Err(ParseError::BadAmount(token.to_string()));
        }
        Ok(AmountArg::Percent(percent))
    } else {
        Ok(AmountArg::Absolute(parse_plain_amount(token)?))
    }
}

fn parse_plain_amount(token: &str) -> Result<f64, ParseError> {
    let amount: f64 = token
        .parse()
        .map_err(|_| ParseError::BadAmount(token.to_string()))?;
    if !(amount.is_finite() && amount > 0.0) {
        return Err(ParseError::BadAmount(token.to_string()));
    }
    Ok(amount)
}

pub const USAGE: &str = "Commands:\n\
    buy [amount] [EUR|USDC] — stage a BTC buy (confirm within 30s)\n\
    buybtc / buyeth / buysol / buyusdc — stage an asset-specific buy\n\
    confirm — execute the staged buy\n\
    convert_eur [amount] — convert EUR into USDC\n\
    confirm_eur — execute a staged large conversion\n\
    enable / disable — toggle the weekly schedule\n\
    status / balance / price / history — reports";
