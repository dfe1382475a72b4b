//! Concurrency properties of the deduction manager over the in-memory ledgers.

use std::sync::Arc;

use common::{CampaignId, ItemId, OrderCode, UserId};
use inventory::{
    DeductionRequest, FastStockLedger, InMemoryFastLedger, InMemoryStockStore, InventoryError, ReleaseScope,
    StockDeductionManager, StockItem, StockStore,
};

type Manager = StockDeductionManager<InMemoryFastLedger, InMemoryStockStore>;

const CAMPAIGN: CampaignId = CampaignId::new(11);
const ITEM: ItemId = ItemId::new(1001);

async fn manager_with(item: StockItem) -> Arc<Manager> {
    let manager = StockDeductionManager::new(InMemoryFastLedger::new(), InMemoryStockStore::new());
    manager.store().upsert_item(item).await.unwrap();
    manager.resync_fast_ledger().await.unwrap();
    Arc::new(manager)
}

fn request(order: usize, user: i64, qty: u32) -> DeductionRequest {
    DeductionRequest::new(
        OrderCode::new(format!("order-{order}")),
        CAMPAIGN,
        ITEM,
        UserId::new(user),
        qty,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_exceed_stock() {
    let stock = 25;
    let manager = manager_with(StockItem::new(CAMPAIGN, ITEM, stock)).await;

    let mut handles = Vec::new();
    for i in 0..60 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            let qty = (i % 3 + 1) as u32;
            manager
                .deduct(&request(i, i as i64, qty))
                .await
                .map(|_| qty)
        }));
    }

    let mut reserved: i64 = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(qty) => reserved += i64::from(qty),
            Err(e) => assert!(matches!(e, InventoryError::InsufficientStock { .. })),
        }
    }

    let remaining = manager.fast().peek(CAMPAIGN, ITEM).await.unwrap().unwrap();
    assert!(reserved <= stock);
    assert_eq!(reserved, stock - remaining);

    let row = manager.store().get_item(CAMPAIGN, ITEM).await.unwrap().unwrap();
    assert_eq!(row.stock, remaining);
    assert_eq!(row.sold, reserved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_buyers_three_units() {
    let manager = manager_with(StockItem::new(CAMPAIGN, ITEM, 3)).await;

    let a = {
        let m = manager.clone();
        tokio::spawn(async move { m.deduct(&request(1, 1, 2)).await })
    };
    let b = {
        let m = manager.clone();
        tokio::spawn(async move { m.deduct(&request(2, 2, 2)).await })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(InventoryError::InsufficientStock { .. })
    )));
    assert_eq!(manager.fast().peek(CAMPAIGN, ITEM).await.unwrap(), Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_user_cap_holds_under_concurrency() {
    let limit = 3;
    let manager =
        manager_with(StockItem::new(CAMPAIGN, ITEM, 100).with_per_user_limit(limit)).await;
    let user = 42;

    let mut handles = Vec::new();
    for i in 0..20 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.deduct(&request(i, user, 1)).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert!(matches!(e, InventoryError::LimitExceeded { .. })),
        }
    }

    assert_eq!(succeeded, limit);
    assert_eq!(
        manager
            .store()
            .purchased(CAMPAIGN, ITEM, UserId::new(user))
            .await
            .unwrap(),
        limit
    );
    // Rejected attempts gave their fast reservation back.
    assert_eq!(
        manager.fast().peek(CAMPAIGN, ITEM).await.unwrap(),
        Some(100 - limit)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_compensation_releases_once() {
    let manager = manager_with(StockItem::new(CAMPAIGN, ITEM, 10)).await;
    manager.deduct(&request(1, 1, 4)).await.unwrap();

    let order = OrderCode::new("order-1");
    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            manager.release_order(&order, ReleaseScope::All).await
        }));
    }

    let mut released = 0;
    for handle in handles {
        released += handle.await.unwrap().unwrap().len();
    }

    assert_eq!(released, 1);
    assert_eq!(manager.fast().peek(CAMPAIGN, ITEM).await.unwrap(), Some(10));
    let row = manager.store().get_item(CAMPAIGN, ITEM).await.unwrap().unwrap();
    assert_eq!(row.stock, 10);
    assert_eq!(row.sold, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_retries_of_same_line_deduct_once() {
    let manager = manager_with(StockItem::new(CAMPAIGN, ITEM, 10)).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.deduct(&request(7, 7, 2)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(manager.fast().peek(CAMPAIGN, ITEM).await.unwrap(), Some(8));
    assert_eq!(manager.store().reservation_count().await, 1);
}
