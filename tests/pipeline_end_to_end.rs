use anyhow::Result;
use shop_etl::constants::{
    batch_datasets, JOINED_DATASET, MONTHLY_SALES_DATASET, TOP_PRODUCTS_DATASET, TURNOVER_DATASET,
};
use shop_etl::pipeline::storage::{self, WriteMode};
use shop_etl::pipeline::{BatchInputs, Pipeline};
use shop_etl::types::{JoinedRecord, MonthlyTotal, ProductTotal};
use shop_etl::{EtlConfig, EtlError, ExecutionContext};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const TRANSACTIONS: &str = "\
transaction_id,user_id,product_id,quantity,amount,transaction_date
T1,alice,P1,2,10.0,2024-01-15 09:30:00
T2,bob,P2,1,-5.0,2024-01-16 10:00:00
T3,carol,P3,3,30.0,2024-02-01
T4,,P1,1,8.0,2024-02-03 12:00:00
T5,dave,X9,1,99.0,2024-02-04 12:00:00
T6,alice,P3,1,12.5,2024-03-10T18:45:00
";

const INVENTORY: &str = "\
product_id,product_name,product_category,stock_level,price
P1,  Red Widget ,widgets,10,2.0
P2,Blue Widget,widgets,5,3.0
P3,Gadget,gadgets,7,1.5
P4,Ghost Item,gadgets,,9.0
";

fn config_for(output: &Path) -> EtlConfig {
    let mut config = EtlConfig::default();
    config.sink.output_dir = output.to_path_buf();
    config.anonymizer.salt = "test-salt".to_string();
    config
}

#[test]
fn test_batch_run_writes_all_datasets() -> Result<()> {
    let tmp = tempdir()?;
    let transactions = tmp.path().join("transactions.csv");
    let inventory = tmp.path().join("inventory.csv");
    fs::write(&transactions, TRANSACTIONS)?;
    fs::write(&inventory, INVENTORY)?;
    let output = tmp.path().join("out");

    let ctx = ExecutionContext::new(config_for(&output)).with_partitions(3);
    let result = Pipeline::run(&ctx, &BatchInputs::new(&transactions, &inventory), WriteMode::Overwrite)?;

    assert_eq!(result.transactions.rows_read, 6);
    // T2 has a negative amount, T4 no user
    assert_eq!(result.transactions_rejected, 2);
    // P4 has no stock level
    assert_eq!(result.inventory_rejected, 1);
    // T5 references X9, which is not stocked
    assert_eq!(result.joined_rows, 3);

    for name in batch_datasets() {
        assert_eq!(storage::part_files(&output.join(name))?.len(), 1, "{name}");
    }

    let joined: Vec<JoinedRecord> = storage::read(&output.join(JOINED_DATASET))?;
    assert_eq!(joined.len(), 3);
    assert!(joined.iter().all(|j| j.product_id != "X9"));
    assert!(joined
        .iter()
        .all(|j| j.user_id.as_ref().is_some_and(|u| u.len() == 64 && u != "alice")));
    // Same user, same digest
    assert_eq!(joined[0].user_id, joined[2].user_id);
    assert_eq!(joined[0].product_name.as_deref(), Some("red widget"));

    let top: Vec<ProductTotal> = storage::read(&output.join(TOP_PRODUCTS_DATASET))?;
    assert_eq!(
        top,
        vec![
            ProductTotal {
                group: Some("gadget".into()),
                total: 63.75
            },
            ProductTotal {
                group: Some("red widget".into()),
                total: 20.0
            },
        ]
    );

    let monthly: Vec<MonthlyTotal> = storage::read(&output.join(MONTHLY_SALES_DATASET))?;
    assert_eq!(
        monthly,
        vec![
            MonthlyTotal { year: 2024, month: 1, total: 10.0 },
            MonthlyTotal { year: 2024, month: 2, total: 30.0 },
            MonthlyTotal { year: 2024, month: 3, total: 12.5 },
        ]
    );

    let turnover: Vec<ProductTotal> = storage::read(&output.join(TURNOVER_DATASET))?;
    assert_eq!(turnover[0].group.as_deref(), Some("gadget"));
    assert_eq!(turnover[0].total, 6.0);
    assert_eq!(turnover[1].total, 4.0);

    ctx.finish();
    Ok(())
}

#[test]
fn test_json_inputs_produce_same_join() -> Result<()> {
    let tmp = tempdir()?;
    let transactions = tmp.path().join("transactions.json");
    let inventory = tmp.path().join("inventory.json");
    fs::write(
        &transactions,
        r#"[
  {"transaction_id": "T1", "user_id": "alice", "product_id": "P1",
   "quantity": 2, "amount": 10.0, "transaction_date": "2024-01-15 09:30:00"},
  {"transaction_id": "T2", "user_id": "bob", "product_id": "P2",
   "quantity": 1, "amount": -5.0, "transaction_date": null}
]"#,
    )?;
    fs::write(
        &inventory,
        concat!(
            "{\"product_id\": \"P1\", \"product_name\": \"Widget\", \"product_category\": \"w\", \"stock_level\": 1, \"price\": 2.0}\n",
            "{\"product_id\": \"P2\", \"product_name\": \"Other\", \"product_category\": \"w\", \"stock_level\": 1, \"price\": 3.0}\n",
        ),
    )?;
    let output = tmp.path().join("out");

    let ctx = ExecutionContext::new(config_for(&output));
    let result = Pipeline::run(&ctx, &BatchInputs::new(&transactions, &inventory), WriteMode::Overwrite)?;

    assert_eq!(result.joined_rows, 1);
    assert_eq!(
        result.top_products,
        vec![ProductTotal {
            group: Some("widget".into()),
            total: 20.0
        }]
    );
    Ok(())
}

#[test]
fn test_error_if_exists_refuses_second_run() -> Result<()> {
    let tmp = tempdir()?;
    let transactions = tmp.path().join("transactions.csv");
    let inventory = tmp.path().join("inventory.csv");
    fs::write(&transactions, TRANSACTIONS)?;
    fs::write(&inventory, INVENTORY)?;
    let output = tmp.path().join("out");
    let inputs = BatchInputs::new(&transactions, &inventory);

    let ctx = ExecutionContext::new(config_for(&output));
    Pipeline::run(&ctx, &inputs, WriteMode::ErrorIfExists)?;
    let err = Pipeline::run(&ctx, &inputs, WriteMode::ErrorIfExists).unwrap_err();
    assert!(matches!(err, EtlError::WriteConflict(_)));

    // Append keeps both runs
    Pipeline::run(&ctx, &inputs, WriteMode::Append)?;
    let joined: Vec<JoinedRecord> = storage::read(&output.join(JOINED_DATASET))?;
    assert_eq!(joined.len(), 6);
    Ok(())
}

#[test]
fn test_missing_input_is_not_found() {
    let tmp = tempdir().unwrap();
    let ctx = ExecutionContext::new(config_for(tmp.path()));
    let err = Pipeline::run(
        &ctx,
        &BatchInputs::new(tmp.path().join("nope.csv"), tmp.path().join("inventory.csv")),
        WriteMode::Overwrite,
    )
    .unwrap_err();
    assert!(matches!(err, EtlError::NotFound(_)));
}

#[test]
fn test_too_many_bad_rows_aborts() -> Result<()> {
    let tmp = tempdir()?;
    let transactions = tmp.path().join("transactions.csv");
    let inventory = tmp.path().join("inventory.csv");
    fs::write(
        &transactions,
        "transaction_id,user_id,product_id,quantity,amount,transaction_date\nT1,a,P1,x,1.0,2024-01-01\nT2,b,P1,1,1.0,2024-01-01\n",
    )?;
    fs::write(&inventory, INVENTORY)?;

    let ctx = ExecutionContext::new(config_for(&tmp.path().join("out")));
    let err = Pipeline::run(&ctx, &BatchInputs::new(&transactions, &inventory), WriteMode::Overwrite)
        .unwrap_err();
    match err {
        EtlError::Format { path, message } => {
            assert_eq!(path, transactions);
            assert!(message.contains("1 of 2"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // Nothing was written
    assert!(!tmp.path().join("out").exists());
    Ok(())
}
