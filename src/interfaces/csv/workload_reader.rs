use crate::application::simulation::Submission;
use crate::error::{LedgerError, Result};
use std::io::Read;

/// Reads scripted submissions from a CSV source with the header
/// `at,node,to,amount,type`.
///
/// Whitespace around fields is trimmed and short records are tolerated, so
/// hand-written workloads parse as expected.
pub struct WorkloadReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> WorkloadReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes one submission per row.
    pub fn submissions(self) -> impl Iterator<Item = Result<Submission>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LedgerError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::TransactionType;

    #[test]
    fn test_reader_valid_stream() {
        let data = "at, node, to, amount, type\n1, 0, 2, 10, send\n4, 3, 1, 5, mint";
        let reader = WorkloadReader::new(data.as_bytes());
        let results: Vec<Result<Submission>> = reader.submissions().collect();

        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().unwrap();
        assert_eq!(
            first,
            &Submission {
                at: 1,
                node: 0,
                to: 2,
                amount: 10,
                r#type: TransactionType::Send,
            }
        );
        assert_eq!(results[1].as_ref().unwrap().r#type, TransactionType::Mint);
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "at,node,to,amount,type\n1,0,2,10,burn\n2,0,1,-3,send\n3,0,1,1,send";
        let reader = WorkloadReader::new(data.as_bytes());
        let results: Vec<Result<Submission>> = reader.submissions().collect();

        assert!(matches!(results[0], Err(LedgerError::CsvError(_))));
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }
}
