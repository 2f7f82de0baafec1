#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::OnceLock;
    use tempfile::tempdir;

    use crate::codec::{
        split_fields, CodecError, DelimitedFileSource, FieldOrder, LineCodec, LineReader,
        LineRecord,
    };
    use crate::error::{GroupSortError, Phase};

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Sale {
        region: String,
        amount: i64,
        note: Option<String>,
    }

    impl LineRecord for Sale {
        fn field_order() -> &'static FieldOrder<Self> {
            static ORDER: OnceLock<FieldOrder<Sale>> = OnceLock::new();
            ORDER.get_or_init(|| {
                FieldOrder::<Sale>::builder()
                    .text("region", |s| s.region.as_str(), |s, v| s.region = v)
                    .parsed("amount", |s| s.amount, |s, v| s.amount = v)
                    .optional("note", |s| s.note.clone(), |s, v| s.note = v)
                    .build()
            })
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Row {
        fields: Vec<String>,
    }

    impl LineRecord for Row {
        fn field_order() -> &'static FieldOrder<Self> {
            static ORDER: OnceLock<FieldOrder<Row>> = OnceLock::new();
            ORDER.get_or_init(|| {
                FieldOrder::<Row>::builder()
                    .rest("fields", |r| r.fields.as_slice(), |r, v| r.fields = v)
                    .build()
            })
        }
    }

    fn sale(region: &str, amount: i64, note: Option<&str>) -> Sale {
        Sale {
            region: region.to_string(),
            amount,
            note: note.map(str::to_string),
        }
    }

    fn row(fields: &[&str]) -> Row {
        Row {
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn test_plain_fields_are_not_quoted() {
        let codec = LineCodec::<Sale>::default();
        assert_eq!(codec.encode(&sale("north", 12, Some("ok"))), "north,12,ok");
        assert_eq!(codec.encode(&sale("north", -3, None)), "north,-3,");
    }

    #[test]
    fn test_special_characters_survive() {
        let codec = LineCodec::<Sale>::default();
        let record = sale("North, East", 5, Some("say \"hi\"\nthen leave"));

        let line = codec.encode(&record);
        assert_eq!(line, "\"North, East\",5,\"say \"\"hi\"\"\nthen leave\"");
        assert_eq!(codec.decode(&line).unwrap(), record);
    }

    #[test]
    fn test_custom_delimiter() {
        let codec = LineCodec::<Sale>::new('\t');
        let record = sale("a,b", 1, Some("tab\there"));

        let line = codec.encode(&record);
        assert_eq!(line, "a,b\t1\t\"tab\there\"");
        assert_eq!(codec.decode(&line).unwrap(), record);
    }

    #[test]
    fn test_empty_record_and_single_empty_field_differ() {
        let codec = LineCodec::<Row>::default();

        assert_eq!(codec.encode(&row(&[])), "");
        assert_eq!(codec.encode(&row(&[""])), "\"\"");
        assert_eq!(codec.decode("").unwrap(), row(&[]));
        assert_eq!(codec.decode("\"\"").unwrap(), row(&[""]));
        assert_eq!(codec.decode(",").unwrap(), row(&["", ""]));
    }

    #[test]
    fn test_invalid_typed_field() {
        let codec = LineCodec::<Sale>::default();
        match codec.decode("north,lots,") {
            Err(CodecError::InvalidField { field, value, .. }) => {
                assert_eq!(field, "amount");
                assert_eq!(value, "lots");
            }
            other => panic!("expected invalid field, got {:?}", other),
        }
    }

    #[test]
    fn test_field_count_mismatch() {
        let codec = LineCodec::<Sale>::default();
        assert_eq!(
            codec.decode("north,5"),
            Err(CodecError::FieldCount {
                expected: 3,
                found: 2,
                at_least: false,
            })
        );
        assert!(codec.decode("north,5,x,y").is_err());
    }

    #[test]
    fn test_malformed_quoting() {
        assert_eq!(
            split_fields("\"ab\"c,1", ','),
            Err(CodecError::TrailingAfterQuote { found: 'c', column: 4 })
        );
        assert_eq!(split_fields("\"ab,1", ','), Err(CodecError::UnterminatedQuote));
    }

    #[test]
    fn test_quote_inside_unquoted_field_is_literal() {
        assert_eq!(split_fields("ab\"c,d", ',').unwrap(), vec!["ab\"c", "d"]);
    }

    #[test]
    fn test_header_uses_field_names() {
        assert_eq!(LineCodec::<Sale>::default().header(), "region,amount,note");
        assert_eq!(LineCodec::<Row>::new(';').header(), "fields");
    }

    #[test]
    fn test_line_reader_joins_quoted_newlines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lines.csv");
        fs::write(&path, "a,\"x\ny\"\nb,c\nlast").unwrap();

        let mut reader = LineReader::open(&path, 4096, Phase::Sort).unwrap();
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("a,\"x\ny\""));
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("b,c"));
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("last"));
        assert_eq!(reader.next_line().unwrap(), None);
        assert_eq!(reader.line_number(), 3);
    }

    #[test]
    fn test_line_reader_rejects_open_quote_at_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.csv");
        fs::write(&path, "ok\na,\"open\nmore\n").unwrap();

        let mut reader = LineReader::open(&path, 4096, Phase::Stream).unwrap();
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("ok"));
        match reader.next_line() {
            Err(GroupSortError::Decode {
                phase,
                line_number,
                source,
                ..
            }) => {
                assert_eq!(phase, Phase::Stream);
                assert_eq!(line_number, Some(2));
                assert_eq!(source, CodecError::UnterminatedQuote);
            }
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_file_source_skips_header_blank_lines_and_cr() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sales.csv");
        let content = "region,amount,note\r\nnorth,1,\r\n\r\nsouth,2,\"multi\nline\"\n";
        fs::write(&path, content).unwrap();

        let source = DelimitedFileSource::open(&path, LineCodec::<Sale>::default(), 4096)
            .unwrap()
            .with_header(true);
        let records: Vec<Sale> = source.collect::<Result<_, _>>().unwrap();

        assert_eq!(
            records,
            vec![sale("north", 1, None), sale("south", 2, Some("multi\nline"))]
        );
    }

    #[test]
    fn test_file_source_reports_line_of_bad_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sales.csv");
        fs::write(&path, "north,1,\nsouth,two,\n").unwrap();

        let mut source =
            DelimitedFileSource::open(&path, LineCodec::<Sale>::default(), 4096).unwrap();
        assert!(source.next().unwrap().is_ok());
        match source.next() {
            Some(Err(GroupSortError::Decode { phase, line_number, .. })) => {
                assert_eq!(phase, Phase::Partition);
                assert_eq!(line_number, Some(2));
            }
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_file_source_accepts_quote_inside_unquoted_field() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("items.csv");
        fs::write(&path, "A,5\" monitor\nB,keyboard\nA,mouse\n").unwrap();

        let source = DelimitedFileSource::open(&path, LineCodec::<Row>::default(), 4096).unwrap();
        let rows: Vec<Row> = source.collect::<Result<_, _>>().unwrap();

        assert_eq!(
            rows,
            vec![
                row(&["A", "5\" monitor"]),
                row(&["B", "keyboard"]),
                row(&["A", "mouse"]),
            ]
        );
    }

    #[test]
    fn test_line_reader_handles_doubled_quotes_across_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lines.csv");
        fs::write(&path, "a,\"say \"\"hi\nthere\"\"\"\nb,2\"\n").unwrap();

        let mut reader = LineReader::open(&path, 4096, Phase::Partition).unwrap();
        let first = reader.next_line().unwrap().unwrap();
        assert_eq!(first, "a,\"say \"\"hi\nthere\"\"\"");
        assert_eq!(split_fields(&first, ',').unwrap(), vec!["a", "say \"hi\nthere\""]);
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("b,2\""));
        assert_eq!(reader.next_line().unwrap(), None);
    }

    #[test]
    fn test_line_reader_uses_configured_delimiter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lines.csv");
        fs::write(&path, "a;\"x\ny\"\nb,\"c\n").unwrap();

        let mut reader = LineReader::open(&path, 4096, Phase::Partition)
            .unwrap()
            .with_delimiter(';');
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("a;\"x\ny\""));
        // After `,` the quote is not at a field start under `;`.
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("b,\"c"));
        assert_eq!(reader.next_line().unwrap(), None);
    }
}
