use common::{CampaignId, ItemId, OrderCode, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use inventory::{
    DeductionRequest, FastStockLedger, InMemoryFastLedger, InMemoryStockStore, ReleaseScope,
    StockDeductionManager, StockItem, StockStore,
};

const CAMPAIGN: CampaignId = CampaignId::new(1);

fn bench_fast_reserve(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let ledger = InMemoryFastLedger::new();
    rt.block_on(async {
        ledger
            .prepare(CAMPAIGN, ItemId::new(1), i64::MAX / 2)
            .await
            .unwrap();
    });

    c.bench_function("fast_ledger/reserve", |b| {
        b.iter(|| {
            rt.block_on(async {
                ledger.reserve(CAMPAIGN, ItemId::new(1), 1).await.unwrap();
            });
        });
    });
}

fn bench_deduct_and_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = StockDeductionManager::new(InMemoryFastLedger::new(), InMemoryStockStore::new());
    rt.block_on(async {
        for item in 1..=5 {
            manager
                .store()
                .upsert_item(StockItem::new(CAMPAIGN, ItemId::new(item), 1_000_000))
                .await
                .unwrap();
        }
        manager.resync_fast_ledger().await.unwrap();
    });

    c.bench_function("manager/deduct_batch_5_then_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                let order = OrderCode::generate();
                let lines: Vec<DeductionRequest> = (1..=5)
                    .map(|item| {
                        DeductionRequest::new(
                            order.clone(),
                            CAMPAIGN,
                            ItemId::new(item),
                            UserId::new(1),
                            1,
                        )
                    })
                    .collect();
                manager.deduct_batch(&lines).await.unwrap();
                manager
                    .release_order(&order, ReleaseScope::All)
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_fast_reserve, bench_deduct_and_release);
criterion_main!(benches);
