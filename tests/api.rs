//! HTTP API tests: a real listener on an ephemeral port, driven with reqwest.

use serde_json::Value;
use sqlx::SqlitePool;
use tempfile::TempDir;

use regobservatory::agencies::{AgencyStore, DirectoryResponse};
use regobservatory::config::Config;
use regobservatory::{db, migrate, server};

async fn setup() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let config: Config = toml::from_str(&format!(
        "[db]\npath = \"{}/regobs.sqlite\"\n",
        tmp.path().display()
    ))
    .unwrap();
    migrate::run_migrations(&config).await.unwrap();
    let pool = db::connect(&config).await.unwrap();

    let directory: DirectoryResponse = serde_json::from_value(serde_json::json!({
        "agencies": [{
            "name": "Department of Agriculture",
            "short_name": "USDA",
            "display_name": "Department of Agriculture",
            "sortable_name": "Agriculture, Department of",
            "slug": "agriculture-department",
            "cfr_references": [{ "title": 2, "chapter": "IV" }],
            "children": [{
                "name": "Forest Service",
                "short_name": null,
                "display_name": "Forest Service, Agriculture Department",
                "sortable_name": "Forest Service",
                "slug": "forest-service",
                "cfr_references": [{ "title": 36, "chapter": "II" }],
                "children": []
            }]
        }]
    }))
    .unwrap();
    AgencyStore::new(pool.clone()).load(&directory).await.unwrap();

    (tmp, pool)
}

async fn agency_id(pool: &SqlitePool, slug: &str) -> String {
    sqlx::query_scalar("SELECT id FROM agencies WHERE slug = ?")
        .bind(slug)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn history_row(pool: &SqlitePool, agency: &str, date: &str, words: i64) {
    sqlx::query("INSERT INTO agency_history (agency_id, date, word_count) VALUES (?, ?, ?)")
        .bind(agency)
        .bind(date)
        .bind(words)
        .execute(pool)
        .await
        .unwrap();
}

async fn serve(pool: SqlitePool) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, server::router(pool, None)).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn get(url: &str) -> (u16, Value) {
    let resp = reqwest::get(url).await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn test_health() {
    let (_tmp, pool) = setup().await;
    let base = serve(pool).await;

    let (status, body) = get(&format!("{}/health", base)).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_word_counts_roll_up_children() {
    let (_tmp, pool) = setup().await;
    let usda = agency_id(&pool, "agriculture-department").await;
    let forest = agency_id(&pool, "forest-service").await;
    history_row(&pool, &usda, "2017-01-01", 90).await;
    history_row(&pool, &usda, "2017-01-02", 100).await;
    history_row(&pool, &forest, "2017-01-01", 40).await;
    let base = serve(pool).await;

    let (status, body) = get(&format!("{}/api/agency-word-counts", base)).await;
    assert_eq!(status, 200);
    let departments = body.as_array().unwrap();
    assert_eq!(departments.len(), 1);
    assert_eq!(departments[0]["shortName"], "USDA");
    assert_eq!(departments[0]["wordCount"], 140);
    assert_eq!(departments[0]["children"][0]["name"], "Forest Service");
    assert_eq!(departments[0]["children"][0]["wordCount"], 40);
}

#[tokio::test]
async fn test_agency_history_filter() {
    let (_tmp, pool) = setup().await;
    let usda = agency_id(&pool, "agriculture-department").await;
    let forest = agency_id(&pool, "forest-service").await;
    history_row(&pool, &usda, "2017-01-02", 100).await;
    history_row(&pool, &usda, "2017-01-01", 90).await;
    history_row(&pool, &forest, "2017-01-01", 40).await;
    let base = serve(pool).await;

    let (status, body) = get(&format!("{}/api/agency-history?agencyId={}", base, usda)).await;
    assert_eq!(status, 200);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["date"], "2017-01-01");
    assert_eq!(rows[1]["wordCount"], 100);

    let (_, all) = get(&format!("{}/api/agency-history", base)).await;
    assert_eq!(all.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_agencies_listing() {
    let (_tmp, pool) = setup().await;
    let base = serve(pool).await;

    let (status, body) = get(&format!("{}/api/agencies", base)).await;
    assert_eq!(status, 200);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["displayName"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec![
            "Department of Agriculture",
            "Forest Service, Agriculture Department"
        ]
    );
}

#[tokio::test]
async fn test_search_errors() {
    let (_tmp, pool) = setup().await;
    let base = serve(pool).await;

    let (status, body) = get(&format!("{}/api/search", base)).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = get(&format!("{}/api/search?query=timber", base)).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "embeddings_disabled");
}

#[tokio::test]
async fn test_status() {
    let (_tmp, pool) = setup().await;
    let base = serve(pool).await;

    let (status, body) = get(&format!("{}/api/status", base)).await;
    assert_eq!(status, 200);
    assert_eq!(body["agencies"], 2);
    assert_eq!(body["checkpoint"]["isCaughtUp"], false);
    assert!(body["checkpoint"]["nextProcessingDate"].is_null());
}
