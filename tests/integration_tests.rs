use anyhow::Result;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::TempDir;
use tuonella_groupsort::codec::{DelimitedFileSource, FieldOrder, LineRecord};
use tuonella_groupsort::{
    ChunkBudget, GroupSortConfig, GroupSortError, GroupedSort, LineCodec, Phase, ShutdownSignal,
};

#[derive(Debug, Default, Clone, PartialEq)]
struct Order {
    customer: String,
    placed_at: u64,
    total: f64,
    coupon: Option<String>,
}

impl LineRecord for Order {
    fn field_order() -> &'static FieldOrder<Self> {
        static ORDER: OnceLock<FieldOrder<Order>> = OnceLock::new();
        ORDER.get_or_init(|| {
            FieldOrder::<Order>::builder()
                .text("customer", |o| o.customer.as_str(), |o, v| o.customer = v)
                .parsed("placed_at", |o| o.placed_at, |o, v| o.placed_at = v)
                .parsed("total", |o| o.total, |o, v| o.total = v)
                .optional("coupon", |o| o.coupon.clone(), |o, v| o.coupon = v)
                .build()
        })
    }
}

/// Helper to write an orders file with a header line
fn create_orders_file(dir: &Path, rows: &[&str]) -> Result<PathBuf> {
    let path = dir.join("orders.csv");
    let mut content = String::from("customer,placed_at,total,coupon\n");
    for row in rows {
        content.push_str(row);
        content.push('\n');
    }
    fs::write(&path, content)?;
    Ok(path)
}

fn test_config(temp_root: &Path) -> GroupSortConfig {
    GroupSortConfig::default()
        .with_temp_root(temp_root)
        .with_chunk_budget(ChunkBudget::Lines(3))
}

fn by_time(a: &Order, b: &Order) -> Result<Ordering> {
    Ok(a.placed_at.cmp(&b.placed_at))
}

#[test]
fn test_end_to_end_file_grouping() -> Result<()> {
    let input_dir = TempDir::new()?;
    let temp_root = TempDir::new()?;
    let input = create_orders_file(
        input_dir.path(),
        &[
            "ann,30,12.5,",
            "bob,10,3.0,SPRING",
            "ann,10,7.25,",
            "\"carl, jr\",5,1.0,\"two\nlines\"",
            "ann,20,9.0,WELCOME",
            "bob,5,4.0,",
        ],
    )?;

    let config = test_config(temp_root.path());
    let mut grouped = GroupedSort::<Order>::new(config.clone())
        .group_by(|o| o.customer.clone())
        .sort_by(by_time);
    let buffer_size = config.sort.io_buffer_size_bytes();
    let source = DelimitedFileSource::open(&input, grouped.codec(), buffer_size)?.with_header(true);

    let mut seen: Vec<(String, Vec<u64>)> = Vec::new();
    let mut coupons = Vec::new();
    let stats = grouped.process(source, |key, orders| {
        let mut times = Vec::new();
        for order in orders {
            times.push(order.placed_at);
            coupons.extend(order.coupon);
        }
        seen.push((key.to_string(), times));
        Ok(())
    })?;

    assert_eq!(
        seen,
        vec![
            ("ann".to_string(), vec![10, 20, 30]),
            ("bob".to_string(), vec![5, 10]),
            ("carl, jr".to_string(), vec![5]),
        ]
    );
    assert_eq!(coupons, vec!["WELCOME", "SPRING", "two\nlines"]);
    assert_eq!(stats.records_partitioned, 6);
    assert_eq!(stats.records_streamed, 6);
    assert_eq!(stats.groups, 3);
    assert!(fs::read_dir(temp_root.path())?.next().is_none());

    Ok(())
}

#[test]
fn test_malformed_row_reports_line() -> Result<()> {
    let input_dir = TempDir::new()?;
    let temp_root = TempDir::new()?;
    let input = create_orders_file(input_dir.path(), &["ann,30,12.5,", "bob,later,3.0,"])?;

    let config = test_config(temp_root.path());
    let mut grouped = GroupedSort::<Order>::new(config.clone()).group_by(|o| o.customer.clone());
    let buffer_size = config.sort.io_buffer_size_bytes();
    let source = DelimitedFileSource::open(&input, grouped.codec(), buffer_size)?.with_header(true);

    let error = grouped
        .process(source, |_, orders| {
            orders.for_each(drop);
            Ok(())
        })
        .expect_err("malformed row should fail");

    match &error {
        GroupSortError::Decode {
            phase, line_number, ..
        } => {
            assert_eq!(*phase, Phase::Partition);
            assert_eq!(*line_number, Some(3));
        }
        other => panic!("expected decode error, got {}", other),
    }
    assert!(error.to_string().contains("placed_at"));
    assert!(fs::read_dir(temp_root.path())?.next().is_none());

    Ok(())
}

#[test]
fn test_written_groups_read_back() -> Result<()> {
    let temp_root = TempDir::new()?;
    let output_dir = TempDir::new()?;
    let orders = vec![
        Order {
            customer: "zed".to_string(),
            placed_at: 2,
            total: 1.5,
            coupon: None,
        },
        Order {
            customer: "zed".to_string(),
            placed_at: 1,
            total: 2.5,
            coupon: Some("A,B".to_string()),
        },
    ];

    let codec = LineCodec::<Order>::default();
    let mut grouped = GroupedSort::new(test_config(temp_root.path()))
        .group_by(|o: &Order| o.customer.clone())
        .sort_by(by_time);
    grouped.process(orders.clone().into_iter().map(Ok::<_, GroupSortError>), |key, group| {
        let mut content = String::new();
        for order in group {
            content.push_str(&codec.encode(&order));
            content.push('\n');
        }
        fs::write(output_dir.path().join(format!("{}.csv", key)), content)?;
        Ok(())
    })?;

    let written = output_dir.path().join("zed.csv");
    let read_back: Vec<Order> =
        DelimitedFileSource::open(&written, codec, 4096)?.collect::<Result<_, _>>()?;
    assert_eq!(read_back, vec![orders[1].clone(), orders[0].clone()]);

    Ok(())
}

#[tokio::test]
async fn test_pipeline_on_blocking_thread_with_shutdown() -> Result<()> {
    let temp_root = TempDir::new()?;
    let config = test_config(temp_root.path());
    let shutdown = ShutdownSignal::new();
    let signal = shutdown.clone();

    let result = tokio::task::spawn_blocking(move || {
        let mut grouped = GroupedSort::<Order>::new(config)
            .group_by(|o| o.customer.clone())
            .with_shutdown_signal(shutdown);
        let orders = (0..50u64).map(|i| {
            Ok::<_, GroupSortError>(Order {
                customer: format!("c{}", i % 5),
                placed_at: i,
                ..Order::default()
            })
        });
        grouped.process(orders, |_, group| {
            group.for_each(drop);
            signal.request();
            Ok(())
        })
    })
    .await?;

    match result {
        Err(e) => assert!(e.is_cancelled()),
        Ok(_) => panic!("pipeline should stop after the first group"),
    }
    assert!(fs::read_dir(temp_root.path())?.next().is_none());

    Ok(())
}
