use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::Utc;
use prodline_catalog::{ProductId, ProductKind, ProductRecord};
use prodline_composition::{
    CompositionChange, CompositionEvent, ComponentSpec, ExchangeRuleSpec, GroupItemId,
    GroupItemSpec, SelectionLine, SubstitutionQuery,
};
use prodline_core::{ExpectedVersion, TenantId, UserId};
use prodline_infra::config::EngineConfig;
use prodline_infra::event_store::{EventStore, InMemoryEventStore, UncommittedEvent};
use prodline_infra::read_model::InMemoryCatalog;
use prodline_infra::service::{self, InMemoryCompositionService, MutationContext};
use rust_decimal::Decimal;
use std::cell::Cell;
use std::sync::Arc;

struct Fixture {
    service: InMemoryCompositionService,
    catalog: Arc<InMemoryCatalog>,
    tenant_id: TenantId,
    actor: UserId,
}

impl Fixture {
    fn new() -> Self {
        let catalog = Arc::new(InMemoryCatalog::new());
        Self {
            service: service::in_memory(catalog.clone(), EngineConfig::default()),
            catalog,
            tenant_id: TenantId::new(),
            actor: UserId::new(),
        }
    }

    fn ctx(&self) -> MutationContext {
        MutationContext::new(self.tenant_id, self.actor, Utc::now())
    }

    fn product(&self, kind: ProductKind, cents: i64) -> ProductId {
        let id = ProductId::generate();
        self.catalog.upsert_product(
            self.tenant_id,
            ProductRecord::new(id, id.to_string(), "Bench product", kind, Decimal::new(cents, 2)),
        );
        id
    }

    fn owner(&self, kind: ProductKind) -> ProductId {
        let id = self.product(kind, 0);
        self.service.define_composition(self.ctx(), id).unwrap();
        id
    }

    /// A group with `size` items, each exchangeable for the next one at 1:1.
    fn group_with_chain(&self, size: usize) -> (ProductId, Vec<GroupItemId>) {
        let group = self.owner(ProductKind::Group);
        let part = self.product(ProductKind::Simple, 250);
        let items: Vec<GroupItemId> = (0..size)
            .map(|i| {
                self.service
                    .add_group_item(
                        self.ctx(),
                        group,
                        GroupItemSpec {
                            name: format!("Item {i}"),
                            product_id: Some(part),
                            category_id: None,
                            min_quantity: Decimal::ONE,
                            max_quantity: Decimal::from(100),
                            default_quantity: None,
                            is_optional: false,
                            extra_price: Decimal::new(50, 2),
                        },
                    )
                    .unwrap()
            })
            .collect();
        for pair in items.windows(2) {
            self.service
                .add_exchange_rule(
                    self.ctx(),
                    group,
                    ExchangeRuleSpec {
                        source_item_id: pair[0],
                        target_item_id: pair[1],
                        ratio: Decimal::ONE,
                        is_active: true,
                    },
                )
                .unwrap();
        }
        (group, items)
    }
}

fn component_spec(product: ProductId, order: i32) -> ComponentSpec {
    ComponentSpec {
        component_product_id: product,
        quantity: Decimal::ONE,
        unit: "pcs".to_string(),
        is_optional: false,
        assembly_order: order,
        notes: None,
    }
}

fn bench_command_execution_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_execution_latency");
    group.sample_size(500);

    // First command on a fresh stream.
    group.bench_function("define_composition_fresh", |b| {
        let fx = Fixture::new();
        b.iter(|| {
            let product = fx.product(ProductKind::Composite, 0);
            fx.service
                .define_composition(fx.ctx(), black_box(product))
                .unwrap();
        });
    });

    // Each attach replays the growing stream before deciding.
    group.bench_function("attach_component_with_history", |b| {
        let fx = Fixture::new();
        let cake = fx.owner(ProductKind::Composite);
        let flour = fx.product(ProductKind::Simple, 240);
        let next_order = Cell::new(0);

        b.iter(|| {
            let order = next_order.get() + 1;
            next_order.set(order);
            fx.service
                .attach_component(fx.ctx(), cake, component_spec(flour, black_box(order)))
                .unwrap();
        });
    });

    group.finish();
}

fn bench_event_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_append_throughput");

    for batch_size in [1, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("batch_append", batch_size),
            batch_size,
            |b, &size| {
                let store = InMemoryEventStore::new();
                let tenant_id = TenantId::new();
                let product_id = ProductId::generate();
                let actor = UserId::new();

                b.iter(|| {
                    let events: Vec<UncommittedEvent> = (0..size)
                        .map(|_| {
                            let event = CompositionEvent {
                                tenant_id,
                                product_id,
                                actor,
                                occurred_at: Utc::now(),
                                change: CompositionChange::AssemblyReordered { positions: vec![] },
                            };
                            UncommittedEvent::from_typed(
                                tenant_id,
                                product_id.0,
                                service::COMPOSITION_AGGREGATE,
                                uuid::Uuid::now_v7(),
                                &event,
                            )
                            .unwrap()
                        })
                        .collect();

                    black_box(store.append(events, ExpectedVersion::Any).unwrap());
                });
            },
        );
    }

    group.finish();
}

fn bench_read_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_paths");

    for size in [5, 50, 200].iter() {
        let fx = Fixture::new();
        let (group_id, items) = fx.group_with_chain(*size);

        group.bench_with_input(BenchmarkId::new("price_selection", size), &items, |b, items| {
            let lines: Vec<SelectionLine> = items
                .iter()
                .map(|id| SelectionLine::item(*id, Decimal::from(2)))
                .collect();
            b.iter(|| {
                black_box(
                    fx.service
                        .price_selection(fx.tenant_id, group_id, black_box(&lines))
                        .unwrap(),
                );
            });
        });

        group.bench_with_input(BenchmarkId::new("resolve_substitutes", size), &items, |b, items| {
            let query = SubstitutionQuery {
                source_item_id: items[0],
                source_quantity: Decimal::from(4),
            };
            b.iter(|| {
                black_box(
                    fx.service
                        .resolve_substitutes(fx.tenant_id, group_id, black_box(query))
                        .unwrap(),
                );
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_command_execution_latency,
    bench_event_append_throughput,
    bench_read_paths
);
criterion_main!(benches);
