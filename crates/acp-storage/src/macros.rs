/// Run `$body` inside one transaction on the store's connection.
///
/// The connection mutex is held for the whole transaction, so the
/// check-then-write sequence in `$body` is atomic with respect to every
/// other store operation. `$body` is an async block body evaluating to
/// `Result<T>`; on `Err` the transaction is rolled back before the error is
/// returned.
macro_rules! transactional {
    ($store:expr, |$conn:ident| $body:block) => {{
        let mut guard = $store.conn.lock().await;
        let tx = guard.transaction().await?;
        let result: $crate::Result<_> = async {
            let $conn: &turso::Connection = &tx;
            $body
        }
        .await;
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!("Failed to roll back transaction: {}", rollback_err);
                }
                Err(err)
            }
        }
    }};
}

/// Run `$body` against the store's connection without opening a transaction.
macro_rules! read_only {
    ($store:expr, |$conn:ident| $body:block) => {{
        let guard = $store.conn.lock().await;
        let $conn: &turso::Connection = &guard;
        let result: $crate::Result<_> = async { $body }.await;
        result
    }};
}
