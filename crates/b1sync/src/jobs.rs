//! 🗓️ Jobs: what used to be four cron handlers, now four methods and a match.
//!
//! Each job is the same dance with different partners:
//! 1. make sure SAP knows who we are
//! 2. scan whatever store collections the transform needs as reference maps
//! 3. pull every row from SAP (all pages or nothing)
//! 4. hand rows + transform to the [`Supervisor`]
//!
//! `All` runs item groups first, because products look item groups up by number and a
//! freshly synced group should be resolvable in the same run. Stocks run last: they point
//! at products and warehouses by guid. 🦆

use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use chrono::{Local, NaiveDate};
use tracing::{info, warn};

use crate::app_config::{AppConfig, StoreConfig};
use crate::backends::{
    DocumentStore, HttpStore, InMemoryStore, SapSession, SapSource, StoreBackend, fetch_all,
};
use crate::common::SourceRecord;
use crate::enrichment::{Enricher, QrEnricher};
use crate::reference::ReferenceMap;
use crate::report::{RunOutcome, RunResult};
use crate::supervisors::Supervisor;
use crate::transforms::{
    ExchangeRateTransform, ItemGroupTransform, ProductLookup, ProductTransform, StockTransform,
    WarehouseLookup, WarehouseTransform, fold_rates,
};

// -- 🗂️ store collections
const ITEM_GROUPS: &str = "item_groups";
const PRODUCTS: &str = "product_and_services";
const WAREHOUSES: &str = "warehouses";
const SUBDIVISIONS: &str = "subdivisions";
const EXCHANGE_RATES: &str = "exchange_rates";
const STOCKS: &str = "stocks";

// -- 📡 SAP queries
const ITEM_GROUPS_QUERY: &str = "ItemGroups?$select=Number,GroupName";
const ITEMS_QUERY: &str = "Items?$select=ItemCode,ItemName,ItemsGroupCode,U_direction";
const WAREHOUSES_QUERY: &str = "Warehouses?$select=WarehouseName,WarehouseCode,U_dep";
const EXCHANGE_RATE_SQL: &str = "getExchangeRateWithDate";
const STOCK_SQL: &str = "OITWGETWithstockCount";

/// 🗓️ One unit of sync work, or all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    ItemGroups,
    Warehouses,
    ExchangeRates,
    Products,
    Stocks,
    All,
}

impl Job {
    pub fn name(self) -> &'static str {
        match self {
            Job::ItemGroups => "item-groups",
            Job::Warehouses => "warehouses",
            Job::ExchangeRates => "exchange-rates",
            Job::Products => "products",
            Job::Stocks => "stocks",
            Job::All => "all",
        }
    }

    // -- 📋 item groups before products, products and warehouses before stocks
    fn expand(self) -> Vec<Job> {
        match self {
            Job::All => vec![
                Job::ItemGroups,
                Job::Warehouses,
                Job::ExchangeRates,
                Job::Products,
                Job::Stocks,
            ],
            single => vec![single],
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 🧰 Everything a job needs, built once per process from [`AppConfig`].
#[derive(Debug)]
pub(crate) struct Jobs {
    session: SapSession,
    store: StoreBackend,
    supervisor: Supervisor,
    enricher: Option<Arc<dyn Enricher>>,
    directions: Arc<ReferenceMap>,
}

impl Jobs {
    pub(crate) fn from_config(app_config: &AppConfig) -> anyhow::Result<Self> {
        let session = SapSession::new(app_config.sap.clone())?;
        let store = match app_config.store {
            StoreConfig::InMemory => {
                warn!("🫙 store = \"InMemory\": documents live in RAM and vanish on exit (dry run)");
                StoreBackend::InMemory(InMemoryStore::new())
            }
            StoreConfig::Http(ref http) => StoreBackend::Http(HttpStore::new(http.clone())?),
        };
        let enricher = match app_config.enrichment {
            Some(ref enrichment) => {
                Some(Arc::new(QrEnricher::new(enrichment.clone())?) as Arc<dyn Enricher>)
            }
            None => None,
        };

        Ok(Self {
            session,
            store,
            supervisor: Supervisor::new(&app_config.runtime),
            enricher,
            directions: Arc::new(ReferenceMap::from_pairs(app_config.directions.clone())),
        })
    }

    /// 🚀 Fresh login, then every job `job` expands to, in order. The first fatal error
    /// stops the sequence; failed rows do not. Jobs that finished before the fatal error
    /// keep their reports.
    pub(crate) async fn run(&self, job: Job) -> RunOutcome {
        let mut outcome = RunOutcome::default();
        if let Err(err) = self.session.login().await {
            outcome.failure =
                Some(anyhow::Error::new(err).context("💀 could not log in to the SAP Service Layer"));
            return outcome;
        }

        for single in job.expand() {
            let result = match single {
                Job::ItemGroups => self.item_groups().await,
                Job::Warehouses => self.warehouses().await,
                Job::ExchangeRates => self.exchange_rates(Local::now().date_naive()).await,
                Job::Products => self.products().await,
                Job::Stocks => self.stocks().await,
                // -- expand() never yields All
                Job::All => continue,
            };
            match result {
                Ok(result) => outcome.results.push(result),
                Err(err) => {
                    outcome.failure = Some(err.context(format!("💀 job '{single}' failed")));
                    break;
                }
            }
        }
        outcome
    }

    pub(crate) async fn logout(&self) {
        self.session.logout().await;
    }

    async fn fetch(&self, mut source: SapSource, what: &str) -> anyhow::Result<Vec<SourceRecord>> {
        self.session.ensure_login().await?;
        let records = fetch_all(&mut source)
            .await
            .with_context(|| format!("💀 fetching {what} from SAP failed"))?;
        info!("📥 fetched {} {} from SAP", records.len(), what);
        Ok(records)
    }

    async fn reference(
        &self,
        collection: &str,
        key_field: &str,
        value_field: &str,
    ) -> anyhow::Result<Arc<ReferenceMap>> {
        let documents = self
            .store
            .scan(collection)
            .await
            .with_context(|| format!("💀 scanning '{collection}' for reference data failed"))?;
        let map = ReferenceMap::build(&documents, key_field, value_field);
        info!(
            "🗺️ {} → {} map from '{}': {} entries",
            key_field,
            value_field,
            collection,
            map.len()
        );
        Ok(Arc::new(map))
    }

    async fn item_groups(&self) -> anyhow::Result<RunResult> {
        let records = self
            .fetch(SapSource::entity(self.session.clone(), ITEM_GROUPS_QUERY), "item groups")
            .await?;
        self.supervisor
            .reconcile(
                Job::ItemGroups.name(),
                ITEM_GROUPS,
                records,
                Arc::new(ItemGroupTransform),
                &self.store,
            )
            .await
    }

    async fn warehouses(&self) -> anyhow::Result<RunResult> {
        let subdivisions = self.reference(SUBDIVISIONS, "name", "guid").await?;
        let records = self
            .fetch(SapSource::entity(self.session.clone(), WAREHOUSES_QUERY), "warehouses")
            .await?;
        self.supervisor
            .reconcile(
                Job::Warehouses.name(),
                WAREHOUSES,
                records,
                Arc::new(WarehouseTransform::new(subdivisions)),
                &self.store,
            )
            .await
    }

    async fn exchange_rates(&self, today: NaiveDate) -> anyhow::Result<RunResult> {
        let params = format!("currDate='{}'", today.format("%Y%m%d"));
        let rows = self
            .fetch(
                SapSource::sql_query(self.session.clone(), EXCHANGE_RATE_SQL, params),
                "exchange rate rows",
            )
            .await?;
        self.supervisor
            .reconcile(
                Job::ExchangeRates.name(),
                EXCHANGE_RATES,
                vec![fold_rates(&rows, today)],
                Arc::new(ExchangeRateTransform),
                &self.store,
            )
            .await
    }

    async fn products(&self) -> anyhow::Result<RunResult> {
        let enricher = self.enricher.clone().context(
            "💀 the products job needs an [enrichment] section: no upload target, no QR codes",
        )?;
        let item_groups = self.reference(ITEM_GROUPS, "number", "guid").await?;
        let enriched = self.reference(PRODUCTS, "code", "barcode").await?;
        let records = self
            .fetch(SapSource::entity(self.session.clone(), ITEMS_QUERY), "products")
            .await?;

        let transform = ProductTransform::new(
            enricher,
            enriched,
            item_groups,
            Arc::clone(&self.directions),
        );
        self.supervisor
            .reconcile(Job::Products.name(), PRODUCTS, records, Arc::new(transform), &self.store)
            .await
    }

    async fn stocks(&self) -> anyhow::Result<RunResult> {
        let warehouses = self
            .store
            .scan(WAREHOUSES)
            .await
            .with_context(|| format!("💀 scanning '{WAREHOUSES}' for stock lookups failed"))?;
        let products = self
            .store
            .scan(PRODUCTS)
            .await
            .with_context(|| format!("💀 scanning '{PRODUCTS}' for stock lookups failed"))?;
        info!(
            "🗺️ stock lookups: {} warehouse(s), {} product(s)",
            warehouses.len(),
            products.len()
        );
        let transform = StockTransform::new(
            Arc::new(WarehouseLookup::build(&warehouses)),
            Arc::new(ProductLookup::build(&products)),
        );

        let records = self
            .fetch(SapSource::sql_query(self.session.clone(), STOCK_SQL, ""), "stock lines")
            .await?;
        self.supervisor
            .reconcile(Job::Stocks.name(), STOCKS, records, Arc::new(transform), &self.store)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::RuntimeConfig;
    use crate::app_config::SapConfig;
    use crate::common::record;
    use crate::enrichment::stub::CountingEnricher;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn jobs_for(server: &MockServer, store: &InMemoryStore, enricher: Option<Arc<CountingEnricher>>) -> Jobs {
        let session = SapSession::new(SapConfig {
            base_url: format!("{}/b1s/v1/", server.uri()),
            company_db: "MBF_TEST".to_string(),
            username: "manager".to_string(),
            password: "hunter2".to_string(),
            route_id: ".node4".to_string(),
            accept_invalid_certs: false,
            timeout_secs: 5,
        })
        .expect("💀 session builds");
        Jobs {
            session,
            store: StoreBackend::InMemory(store.clone()),
            supervisor: Supervisor::new(&RuntimeConfig {
                worker_count: 4,
                progress: false,
            }),
            enricher: enricher.map(|e| e as Arc<dyn Enricher>),
            directions: Arc::new(ReferenceMap::from_pairs([("ВЕЛО", "velo-guid")])),
        }
    }

    async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/b1s/v1/Login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "SessionId": "sess-7" })))
            .mount(server)
            .await;
    }

    async fn mount_items(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/b1s/v1/Items"))
            .and(query_param_is_missing("$skip"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    { "ItemCode": "P-1", "ItemName": "bearing", "ItemsGroupCode": 100, "U_direction": "ВЕЛО" },
                    { "ItemCode": "P-2", "ItemName": "chain", "ItemsGroupCode": 100, "U_direction": "ВЕЛО" }
                ],
                "odata.nextLink": "Items?$select=ItemCode,ItemName,ItemsGroupCode,U_direction&$skip=2"
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b1s/v1/Items"))
            .and(query_param("$skip", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{ "ItemCode": "P-3", "ItemName": "tyre", "ItemsGroupCode": 200 }]
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn the_one_where_all_means_item_groups_first() {
        assert_eq!(Job::All.expand()[0], Job::ItemGroups);
        assert_eq!(Job::All.expand().len(), 5);
        assert_eq!(Job::All.expand().last(), Some(&Job::Stocks));
        assert_eq!(Job::Products.expand(), vec![Job::Products]);
        assert_eq!(Job::ExchangeRates.to_string(), "exchange-rates");
    }

    #[tokio::test]
    async fn the_one_where_products_sync_end_to_end_and_the_rerun_uploads_nothing() {
        let the_server = MockServer::start().await;
        mount_login(&the_server).await;
        mount_items(&the_server).await;
        let the_store = InMemoryStore::new();
        the_store
            .seed(ITEM_GROUPS, vec![record(json!({ "number": 100, "guid": "group-100" }))])
            .await;
        the_store
            .seed(
                PRODUCTS,
                vec![record(json!({ "code": "P-2", "barcode": "https://cdn.test/old.svg", "guid": "keep" }))],
            )
            .await;

        let the_first_enricher = Arc::new(CountingEnricher::default());
        let the_results = jobs_for(&the_server, &the_store, Some(the_first_enricher.clone()))
            .run(Job::Products)
            .await
            .into_result()
            .expect("💀 the first run should succeed");

        let the_result = &the_results[0];
        assert_eq!(
            (the_result.total, the_result.succeeded, the_result.skipped, the_result.errored),
            (3, 2, 1, 0)
        );
        assert_eq!(the_first_enricher.calls(), 2);

        let the_docs = the_store.documents(PRODUCTS).await;
        assert_eq!(the_docs.len(), 3);
        let the_bearing = the_docs
            .iter()
            .find(|doc| doc.str_field("code") == "P-1")
            .expect("💀 P-1 was inserted");
        assert_eq!(the_bearing.str_field("item_group_id"), "group-100");
        assert_eq!(the_bearing.str_field("direction_id"), "velo-guid");
        assert_eq!(the_bearing.str_field("barcode"), "https://cdn.test/P-1.svg");
        let the_tyre = the_docs
            .iter()
            .find(|doc| doc.str_field("code") == "P-3")
            .expect("💀 P-3 was inserted");
        assert_eq!(the_tyre.str_field("item_group_id"), "");

        let the_second_enricher = Arc::new(CountingEnricher::default());
        let the_rerun = jobs_for(&the_server, &the_store, Some(the_second_enricher.clone()))
            .run(Job::Products)
            .await
            .into_result()
            .expect("💀 the rerun should succeed");

        assert_eq!(the_rerun[0].skipped, 3);
        assert_eq!(the_second_enricher.calls(), 0);
        assert_eq!(the_store.documents(PRODUCTS).await.len(), 3);
    }

    #[tokio::test]
    async fn the_one_where_products_without_enrichment_config_refuse_to_start() {
        let the_server = MockServer::start().await;
        mount_login(&the_server).await;

        let the_error = jobs_for(&the_server, &InMemoryStore::new(), None)
            .run(Job::Products)
            .await
            .failure
            .expect("💀 products without [enrichment] must not run");

        assert!(format!("{the_error:#}").contains("[enrichment]"));
    }

    #[tokio::test]
    async fn the_one_where_warehouses_find_their_subdivision() {
        let the_server = MockServer::start().await;
        mount_login(&the_server).await;
        Mock::given(method("GET"))
            .and(path("/b1s/v1/Warehouses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    { "WarehouseCode": "01", "WarehouseName": "Main", "U_dep": "Tashkent" },
                    { "WarehouseCode": "02", "WarehouseName": "Spare" }
                ]
            })))
            .mount(&the_server)
            .await;
        let the_store = InMemoryStore::new();
        the_store
            .seed(SUBDIVISIONS, vec![record(json!({ "name": "Tashkent", "guid": "sub-1" }))])
            .await;

        let the_results = jobs_for(&the_server, &the_store, None)
            .run(Job::Warehouses)
            .await
            .into_result()
            .expect("💀 warehouses should sync");

        assert!(the_results[0].is_clean());
        let the_docs = the_store.documents(WAREHOUSES).await;
        assert_eq!(the_docs.len(), 2);
        assert_eq!(the_docs.iter().filter(|d| d.str_field("subdivision_id") == "sub-1").count(), 1);
    }

    #[tokio::test]
    async fn the_one_where_todays_rates_become_one_document() {
        let the_server = MockServer::start().await;
        mount_login(&the_server).await;
        Mock::given(method("GET"))
            .and(path("/b1s/v1/SQLQueries('getExchangeRateWithDate')/List"))
            .and(body_json(json!({ "ParamList": "currDate='20240315'" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    { "Currency": "UZS", "Rate": 12650.0 },
                    { "Currency": "EUR", "Rate": 0.92 }
                ]
            })))
            .expect(2)
            .mount(&the_server)
            .await;
        let the_store = InMemoryStore::new();
        let the_jobs = jobs_for(&the_server, &the_store, None);
        let the_day = NaiveDate::from_ymd_opt(2024, 3, 15).expect("💀 a real date");

        the_jobs.session.login().await.expect("💀 login works");
        the_jobs.exchange_rates(the_day).await.expect("💀 first sync");
        the_jobs.exchange_rates(the_day).await.expect("💀 same-day resync");

        let the_docs = the_store.documents(EXCHANGE_RATES).await;
        assert_eq!(the_docs.len(), 1);
        assert_eq!(the_docs[0].str_field("date"), "2024-03-15");
        assert_eq!(the_docs[0].get("uzs"), Some(&json!(12650.0)));
        assert_eq!(the_docs[0].get("ruble"), Some(&json!(0.0)));
    }

    #[tokio::test]
    async fn the_one_where_a_broken_page_fails_the_job_before_any_write() {
        let the_server = MockServer::start().await;
        mount_login(&the_server).await;
        Mock::given(method("GET"))
            .and(path("/b1s/v1/ItemGroups"))
            .and(query_param_is_missing("$skip"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{ "Number": 100, "GroupName": "Tyres" }],
                "odata.nextLink": "ItemGroups?$skip=1"
            })))
            .mount(&the_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b1s/v1/ItemGroups"))
            .and(query_param("$skip", "1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&the_server)
            .await;
        let the_store = InMemoryStore::new();

        let the_outcome = jobs_for(&the_server, &the_store, None)
            .run(Job::All)
            .await;

        assert!(the_outcome.results.is_empty());
        let the_error = the_outcome.failure.expect("💀 a broken page is fatal");
        assert!(format!("{the_error:#}").contains("item-groups"));
        assert_eq!(the_store.write_count(), 0);
    }

    #[tokio::test]
    async fn the_one_where_warehouses_die_but_item_groups_keep_their_report() {
        let the_server = MockServer::start().await;
        mount_login(&the_server).await;
        Mock::given(method("GET"))
            .and(path("/b1s/v1/ItemGroups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{ "Number": 100, "GroupName": "Tyres" }]
            })))
            .mount(&the_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b1s/v1/Warehouses"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&the_server)
            .await;
        let the_store = InMemoryStore::new();

        let the_outcome = jobs_for(&the_server, &the_store, None).run(Job::All).await;

        assert_eq!(the_outcome.results.len(), 1);
        assert_eq!(the_outcome.results[0].job, "item-groups");
        let the_error = the_outcome.failure.expect("💀 the warehouse fetch is fatal");
        assert!(format!("{the_error:#}").contains("warehouses"));
        assert_eq!(the_store.documents(ITEM_GROUPS).await.len(), 1);
    }

    #[tokio::test]
    async fn the_one_where_stock_lines_find_their_product_and_warehouse() {
        let the_server = MockServer::start().await;
        mount_login(&the_server).await;
        Mock::given(method("GET"))
            .and(path("/b1s/v1/SQLQueries('OITWGETWithstockCount')/List"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    { "ItemCode": "B-7", "WhsCode": "01", "OnHand": 12.0, "AvgPrice": 35000.0 },
                    { "ItemCode": "GHOST", "WhsCode": "01", "OnHand": 1.0, "AvgPrice": 1.0 }
                ]
            })))
            .expect(2)
            .mount(&the_server)
            .await;
        let the_store = InMemoryStore::new();
        the_store
            .seed(
                WAREHOUSES,
                vec![record(json!({ "code": "01", "guid": "whs-1", "subdivision_id": "sub-1" }))],
            )
            .await;
        the_store
            .seed(
                PRODUCTS,
                vec![record(json!({
                    "code": "B-7",
                    "guid": "product-1",
                    "name": "bike chain",
                    "direction_id": "velo-guid"
                }))],
            )
            .await;
        let the_jobs = jobs_for(&the_server, &the_store, None);

        let the_results = the_jobs
            .run(Job::Stocks)
            .await
            .into_result()
            .expect("💀 one orphan line is not fatal");

        let the_result = &the_results[0];
        assert_eq!(
            (the_result.total, the_result.succeeded, the_result.errored),
            (2, 1, 1)
        );
        assert!(the_result.errors[0].reason.contains("GHOST"));
        let the_docs = the_store.documents(STOCKS).await;
        assert_eq!(the_docs.len(), 1);
        assert_eq!(the_docs[0].str_field("product_and_service_id"), "product-1");
        assert_eq!(the_docs[0].str_field("warehouse_id"), "whs-1");
        assert_eq!(the_docs[0].str_field("subdivision_id"), "sub-1");
        assert_eq!(the_docs[0].get("quantity"), Some(&json!(12.0)));

        // -- 🔁 same stock again: the document is updated, not duplicated
        the_jobs.run(Job::Stocks).await.into_result().expect("💀 rerun works");
        assert_eq!(the_store.documents(STOCKS).await.len(), 1);
    }
}
