use super::files::{delete_entry, make_dir, remove_dir, write_entry};
use super::repo::{Repo, StoreError};
use serde_json::Value;
use tracing::debug;
use vdrive_core::{BatchItemResult, BatchOp, BatchResult, ErrorCode};

impl Repo {
    /// Execute a batch in one transaction.
    ///
    /// Items run in order and see each other's effects. Request-level problems
    /// (bad item, missing path, non-empty directory) are recorded per item;
    /// a storage fault aborts the whole batch.
    pub fn execute_batch(
        &self,
        owner_id: &str,
        items: Vec<Value>,
        writer: Option<&str>,
    ) -> Result<BatchResult, StoreError> {
        self.with_tx(|tx, clock| {
            let mut results = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                let op = match BatchOp::parse(item) {
                    Ok(op) => op,
                    Err(e) => {
                        results.push(BatchItemResult::failed(
                            index,
                            None,
                            ErrorCode::Validation,
                            e.to_string(),
                        ));
                        continue;
                    }
                };

                let outcome = match &op {
                    BatchOp::Create(input) | BatchOp::Update(input) => {
                        let (path, body) = input.clone().into_parts();
                        write_entry(tx, clock, owner_id, &path, &body, writer).map(|_| ())
                    }
                    BatchOp::Delete { path } => {
                        delete_entry(tx, clock, owner_id, path).map(|_| ())
                    }
                    BatchOp::Mkdir { path } => {
                        make_dir(tx, clock, owner_id, path, writer).map(|_| ())
                    }
                    BatchOp::Rmdir { path } => remove_dir(tx, clock, owner_id, path).map(|_| ()),
                };

                match outcome {
                    Ok(()) => results.push(BatchItemResult::ok(index, &op)),
                    Err(e) if e.is_soft() => {
                        debug!("Batch item {} ({}) failed: {}", index, op.name(), e);
                        results.push(BatchItemResult::failed(
                            index,
                            Some(&op),
                            e.code(),
                            e.to_string(),
                        ));
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(BatchResult::from_results(results))
        })
    }
}
