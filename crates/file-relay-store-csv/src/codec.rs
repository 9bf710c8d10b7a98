//! Row encoding for the record store.
//!
//! Writing quotes every field and doubles embedded quotes. Reading accepts that shape
//! plus the looser rows written by earlier versions: unquoted fields, a single quoted
//! column, LF or CRLF line endings, and stray quotes inside unquoted fields.

pub const DELIMITER: char = ',';
pub const QUOTE: char = '"';
pub const ROW_TERMINATOR: &str = "\r\n";

/// Encode one row, terminator included.
#[must_use]
pub fn encode_row<S>(fields: &[S]) -> String
where
    S: AsRef<str>,
{
    let mut row = String::new();
    for (position, field) in fields.iter().enumerate() {
        if position > 0 {
            row.push(DELIMITER);
        }
        row.push(QUOTE);
        for ch in field.as_ref().chars() {
            if ch == QUOTE {
                row.push(QUOTE);
            }
            row.push(ch);
        }
        row.push(QUOTE);
    }
    row.push_str(ROW_TERMINATOR);
    row
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FieldStart,
    Unquoted,
    Quoted,
    QuoteInQuoted,
}

/// Split `input` into rows of fields. Blank lines produce no row.
#[must_use]
pub fn parse_rows(input: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut row_started = false;
    let mut state = State::FieldStart;

    for ch in input.chars() {
        match state {
            State::FieldStart => match ch {
                QUOTE => {
                    row_started = true;
                    state = State::Quoted;
                }
                DELIMITER => {
                    row_started = true;
                    row.push(std::mem::take(&mut field));
                }
                '\r' | '\n' => {
                    if row_started {
                        row.push(std::mem::take(&mut field));
                        rows.push(std::mem::take(&mut row));
                        row_started = false;
                    }
                }
                _ => {
                    row_started = true;
                    field.push(ch);
                    state = State::Unquoted;
                }
            },
            State::Unquoted => match ch {
                DELIMITER => {
                    row.push(std::mem::take(&mut field));
                    state = State::FieldStart;
                }
                '\r' | '\n' => {
                    row.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut row));
                    row_started = false;
                    state = State::FieldStart;
                }
                _ => field.push(ch),
            },
            State::Quoted => match ch {
                QUOTE => state = State::QuoteInQuoted,
                _ => field.push(ch),
            },
            State::QuoteInQuoted => match ch {
                QUOTE => {
                    field.push(QUOTE);
                    state = State::Quoted;
                }
                DELIMITER => {
                    row.push(std::mem::take(&mut field));
                    state = State::FieldStart;
                }
                '\r' | '\n' => {
                    row.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut row));
                    row_started = false;
                    state = State::FieldStart;
                }
                _ => {
                    field.push(ch);
                    state = State::Unquoted;
                }
            },
        }
    }

    if row_started {
        row.push(field);
        rows.push(row);
    }

    rows
}

/// True when the row's first field names the handle column.
#[must_use]
pub fn is_header_row(row: &[String]) -> bool {
    row.first()
        .is_some_and(|first| first.to_lowercase().contains(file_relay_core::STORE_HEADER[0]))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn strings(row: &[&str]) -> Vec<String> {
        row.iter().map(|field| (*field).to_string()).collect()
    }

    #[test]
    fn every_field_is_quoted() {
        let row = encode_row(&["1", "ref", "a,b \"c\"", "Document"]);
        assert_eq!(row, "\"1\",\"ref\",\"a,b \"\"c\"\"\",\"Document\"\r\n");
    }

    #[test]
    fn quoted_row_round_trips() {
        let fields = ["1234", "BQAC-xyz", "report, \"final\".pdf", "Document"];
        let rows = parse_rows(&encode_row(&fields));
        assert_eq!(rows, vec![strings(&fields)]);
    }

    #[test]
    fn embedded_newline_stays_inside_the_field() {
        let fields = ["1", "ref", "line one\r\nline two", "Photo"];
        let encoded = format!("{}{}", encode_row(&fields), encode_row(&["2", "r", "n", "Video"]));
        let rows = parse_rows(&encoded);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][2], "line one\r\nline two");
    }

    #[test]
    fn legacy_rows_with_one_quoted_column_parse() {
        let input = "numerical_file_id,file_id,file_name,file_type\n\
                     0123,AgAD,\"holiday, 2023.jpg\",Photo\n\
                     4567,BQAC,plain.pdf,Document\n";
        let rows = parse_rows(input);
        assert_eq!(rows.len(), 3);
        assert!(is_header_row(&rows[0]));
        assert_eq!(rows[1], strings(&["0123", "AgAD", "holiday, 2023.jpg", "Photo"]));
        assert_eq!(rows[2], strings(&["4567", "BQAC", "plain.pdf", "Document"]));
    }

    #[test]
    fn blank_lines_and_missing_final_newline() {
        let rows = parse_rows("a,b\r\n\r\n\nc,d");
        assert_eq!(rows, vec![strings(&["a", "b"]), strings(&["c", "d"])]);
    }

    #[test]
    fn empty_fields_are_kept() {
        let rows = parse_rows(",x,\n\"\"\n");
        assert_eq!(rows, vec![strings(&["", "x", ""]), strings(&[""])]);
    }

    #[test]
    fn stray_quotes_are_literal() {
        let rows = parse_rows("a\"b,\"c\"d\n");
        assert_eq!(rows, vec![strings(&["a\"b", "cd"])]);
    }

    #[test]
    fn header_detection_is_case_insensitive() {
        assert!(is_header_row(&strings(&["Numerical_File_ID", "x"])));
        assert!(!is_header_row(&strings(&["0123", "numerical_file_id"])));
        assert!(!is_header_row(&[]));
    }

    proptest! {
        #[test]
        fn property_encoded_rows_parse_back(fields in proptest::collection::vec("\\PC*", 1..6)) {
            let rows = parse_rows(&encode_row(&fields));
            prop_assert_eq!(rows, vec![fields]);
        }
    }
}
