//! Replay input: order commands as CSV rows.
//!
//! ```text
//! kind,account,taker_pays,taker_gets,sell,sequence
//! create,alice,500/USD/g1,500/USD/g2,false,
//! cancel,bob,,,,3
//! replace,alice,20/USD/g1,8/XRP,,1
//! ```

use std::io;
use std::path::Path;

use serde::Deserialize;

use crate::amount::{AccountId, Amount};
use crate::command::{CancelOffer, Command, IncomingOrder, ReplaceOffer};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct OrderRow {
    pub kind: String,
    pub account: String,
    pub taker_pays: Option<String>,
    pub taker_gets: Option<String>,
    pub sell: Option<bool>,
    pub sequence: Option<u32>,
}

impl OrderRow {
    /// Convert a raw row to a typed command. `line` is only used in errors.
    pub fn to_command(&self, line: u64) -> Result<Command> {
        let invalid = |reason: &str| Error::InvalidRow {
            line,
            reason: reason.to_string(),
        };

        match self.kind.trim() {
            "create" => Ok(Command::Create(self.order(line)?)),
            "cancel" => {
                let sequence = self.sequence.ok_or_else(|| invalid("cancel needs a sequence"))?;
                Ok(Command::Cancel(CancelOffer {
                    owner: AccountId::new(self.account.trim()),
                    sequence,
                }))
            }
            "replace" => {
                let sequence = self.sequence.ok_or_else(|| invalid("replace needs a sequence"))?;
                Ok(Command::Replace(ReplaceOffer {
                    sequence,
                    order: self.order(line)?,
                }))
            }
            other => Err(invalid(&format!("unknown kind {other:?}"))),
        }
    }

    fn order(&self, line: u64) -> Result<IncomingOrder> {
        let amount = |field: &Option<String>, name: &str| -> Result<Amount> {
            let raw = field.as_deref().ok_or_else(|| Error::InvalidRow {
                line,
                reason: format!("missing {name}"),
            })?;
            Ok(raw.parse::<Amount>()?)
        };
        Ok(IncomingOrder {
            taker: AccountId::new(self.account.trim()),
            taker_pays: amount(&self.taker_pays, "taker_pays")?,
            taker_gets: amount(&self.taker_gets, "taker_gets")?,
            sell: self.sell.unwrap_or(false),
        })
    }
}

/// Read every command from CSV with a header row.
pub fn read_commands<R: io::Read>(reader: R) -> Result<Vec<Command>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut commands = Vec::new();
    for (i, row) in rdr.deserialize::<OrderRow>().enumerate() {
        // Line 1 is the header
        commands.push(row?.to_command(i as u64 + 2)?);
    }
    Ok(commands)
}

pub fn read_commands_from_path(path: impl AsRef<Path>) -> Result<Vec<Command>> {
    let file = std::fs::File::open(path)?;
    read_commands(io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_read_all_kinds() {
        let csv = "kind,account,taker_pays,taker_gets,sell,sequence\n\
                   create,alice,500/USD/g1,500/USD/g2,true,\n\
                   cancel,bob,,,,3\n\
                   replace,alice,20/USD/g1,8/XRP,,1\n";
        let commands = read_commands(csv.as_bytes()).unwrap();
        assert_eq!(commands.len(), 3);

        match &commands[0] {
            Command::Create(order) => {
                assert!(order.sell);
                assert_eq!(order.taker_pays, Amount::issued(dec!(500), "USD", "g1"));
            }
            other => panic!("Expected Create, got {other:?}"),
        }
        assert_eq!(
            commands[1],
            Command::Cancel(CancelOffer {
                owner: AccountId::new("bob"),
                sequence: 3
            })
        );
        match &commands[2] {
            Command::Replace(replace) => {
                assert_eq!(replace.sequence, 1);
                assert!(!replace.order.sell);
                assert_eq!(replace.order.taker_gets, Amount::native(dec!(8)));
            }
            other => panic!("Expected Replace, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_rows_report_line() {
        let csv = "kind,account,taker_pays,taker_gets,sell,sequence\n\
                   create,alice,5/USD/g1,5/XRP,,\n\
                   cancel,bob,,,,\n";
        let err = read_commands(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InvalidRow { line: 3, .. }), "{err}");
    }

    #[test]
    fn test_bad_amount() {
        let csv = "kind,account,taker_pays,taker_gets,sell,sequence\n\
                   create,alice,five/USD/g1,5/XRP,,\n";
        assert!(matches!(read_commands(csv.as_bytes()), Err(Error::Amount(_))));
    }
}
