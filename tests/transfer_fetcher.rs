use serde_json::json;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use transfer_watcher::blockchain::transfer_detector::TRANSFER_EVENT_SIGNATURE;
use transfer_watcher::blockchain::{RpcClient, RpcTransferFetcher, TransferFetcher};
use transfer_watcher::error::FetchError;

const DAI: &str = "0x6b175474e89094c44da98b954eedeac495271d0f";

fn topic_for(address: &str) -> String {
    format!("0x{:0>64}", address.trim_start_matches("0x"))
}

fn transfer_log(block: u64, log_index: u32, tx: &str, amount: u128) -> serde_json::Value {
    json!({
        "address": DAI,
        "topics": [
            TRANSFER_EVENT_SIGNATURE,
            topic_for("0x1111111111111111111111111111111111111111"),
            topic_for("0x2222222222222222222222222222222222222222"),
        ],
        "data": format!("0x{:064x}", amount),
        "blockNumber": format!("0x{:x}", block),
        "transactionHash": tx,
        "logIndex": format!("0x{:x}", log_index),
    })
}

fn fetcher(server: &MockServer) -> RpcTransferFetcher {
    RpcTransferFetcher::new(RpcClient::new(&server.uri(), 5).unwrap())
}

fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
}

async fn mount_head(server: &MockServer, head: u64) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_blockNumber"})))
        .respond_with(rpc_result(json!(format!("0x{:x}", head))))
        .mount(server)
        .await;
}

async fn mount_window(server: &MockServer, from: u64, to: u64, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "eth_getLogs",
            "params": [{ "fromBlock": format!("0x{:x}", from), "toBlock": format!("0x{:x}", to), "address": DAI }]
        })))
        .respond_with(response)
        .expect(1)
        .mount(server)
        .await;
}

fn range_too_large() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": { "code": -32005, "message": "query returned more than 10000 results" }
    }))
}

async fn get_logs_requests(server: &MockServer) -> Vec<serde_json::Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| serde_json::from_slice::<serde_json::Value>(&r.body).unwrap())
        .filter(|body| body["method"] == "eth_getLogs")
        .collect()
}

#[tokio::test]
async fn fetches_transfers_in_block_order() {
    let server = MockServer::start().await;
    mount_head(&server, 102).await;
    mount_window(
        &server,
        101,
        102,
        rpc_result(json!([
            transfer_log(102, 0, "0xBBB", 5_000_000_000_000_000_000),
            transfer_log(101, 3, "0xaaa", 2_000_000_000_000_000_000),
        ])),
    )
    .await;

    let transfers = fetcher(&server).fetch_transfers(DAI, 101).await.unwrap();

    assert_eq!(transfers.len(), 2);
    assert_eq!(transfers[0].block_number, 101);
    assert_eq!(transfers[0].raw_amount, 2_000_000_000_000_000_000);
    assert_eq!(transfers[1].transaction_hash, "0xbbb");
    assert_eq!(transfers[1].from_address, "0x1111111111111111111111111111111111111111");
}

#[tokio::test]
async fn long_ranges_are_split_into_bounded_windows() {
    let server = MockServer::start().await;
    mount_head(&server, 9).await;
    mount_window(&server, 0, 3, rpc_result(json!([transfer_log(2, 0, "0x02", 10)]))).await;
    mount_window(
        &server,
        4,
        7,
        rpc_result(json!([transfer_log(7, 1, "0x07", 30), transfer_log(5, 0, "0x05", 20)])),
    )
    .await;
    mount_window(&server, 8, 9, rpc_result(json!([transfer_log(9, 0, "0x09", 40)]))).await;

    let transfers = fetcher(&server)
        .with_max_block_range(4)
        .fetch_transfers(DAI, 0)
        .await
        .unwrap();

    let blocks: Vec<u64> = transfers.iter().map(|t| t.block_number).collect();
    assert_eq!(blocks, vec![2, 5, 7, 9]);
    assert_eq!(get_logs_requests(&server).await.len(), 3);
}

#[tokio::test]
async fn rejected_range_is_halved_and_retried() {
    let server = MockServer::start().await;
    mount_head(&server, 110).await;
    mount_window(&server, 101, 110, range_too_large()).await;
    mount_window(&server, 101, 105, rpc_result(json!([transfer_log(103, 0, "0x103", 1)]))).await;
    mount_window(
        &server,
        106,
        110,
        rpc_result(json!([transfer_log(108, 0, "0x108", 3), transfer_log(106, 4, "0x106", 2)])),
    )
    .await;

    let transfers = fetcher(&server)
        .with_max_block_range(10)
        .fetch_transfers(DAI, 101)
        .await
        .unwrap();

    let blocks: Vec<u64> = transfers.iter().map(|t| t.block_number).collect();
    assert_eq!(blocks, vec![103, 106, 108]);
    assert_eq!(get_logs_requests(&server).await.len(), 3);
}

#[tokio::test]
async fn start_beyond_head_returns_nothing() {
    let server = MockServer::start().await;
    mount_head(&server, 100).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getLogs"})))
        .respond_with(rpc_result(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let transfers = fetcher(&server).fetch_transfers(DAI, 101).await.unwrap();
    assert!(transfers.is_empty());
}

#[tokio::test]
async fn empty_range_returns_no_transfers() {
    let server = MockServer::start().await;
    mount_head(&server, 50).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getLogs"})))
        .respond_with(rpc_result(json!([])))
        .mount(&server)
        .await;

    let transfers = fetcher(&server).fetch_transfers(DAI, 0).await.unwrap();
    assert!(transfers.is_empty());
}

#[tokio::test]
async fn server_error_is_a_fetch_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = fetcher(&server).fetch_transfers(DAI, 0).await.unwrap_err();
    assert!(matches!(err, FetchError::HttpStatus { status: 500 }));
}

#[tokio::test]
async fn range_error_surfaces_once_window_is_a_single_block() {
    let server = MockServer::start().await;
    mount_head(&server, 20).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getLogs"})))
        .respond_with(range_too_large())
        .mount(&server)
        .await;

    let err = fetcher(&server)
        .with_max_block_range(4)
        .fetch_transfers(DAI, 0)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Rpc { code: -32005, .. }));
    // Windows of 4, 2 and 1 blocks starting at block 0
    let ranges: Vec<(String, String)> = get_logs_requests(&server)
        .await
        .iter()
        .map(|body| {
            (
                body["params"][0]["fromBlock"].as_str().unwrap().to_string(),
                body["params"][0]["toBlock"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        ranges,
        vec![
            ("0x0".to_string(), "0x3".to_string()),
            ("0x0".to_string(), "0x1".to_string()),
            ("0x0".to_string(), "0x0".to_string()),
        ]
    );
}
