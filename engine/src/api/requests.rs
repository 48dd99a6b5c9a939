//! Builders for every request the sync managers send

use super::{ApiRequest, FileUpload, Method};
use serde_json::json;

pub const TASK_PATH: &str = "DownloadStation/task.cgi";
pub const STATISTIC_PATH: &str = "DownloadStation/statistic.cgi";
pub const ENTRY_PATH: &str = "entry.cgi";

const TASK_API: &str = "SYNO.DownloadStation.Task";
const STATISTIC_API: &str = "SYNO.DownloadStation.Statistic";
const SEARCH_API: &str = "SYNO.DownloadStation2.BTSearch";
const ENTRY_API: &str = "SYNO.Entry.Request";

/// Number of search results fetched per poll
pub const SEARCH_PAGE_SIZE: usize = 50;

const VPN_APIS: [&str; 4] = [
    "SYNO.Core.Network.VPN.PPTP",
    "SYNO.Core.Network.VPN.OpenVPNWithConf",
    "SYNO.Core.Network.VPN.OpenVPN",
    "SYNO.Core.Network.VPN.L2TP",
];

fn task(method: Method, name: &str) -> ApiRequest {
    ApiRequest::new(method, TASK_PATH)
        .param("api", TASK_API)
        .param("method", name)
        .param("version", 1)
}

/// Full task snapshot with transfer and detail children
pub fn list_tasks() -> ApiRequest {
    task(Method::Get, "list").param("additional", "transfer,detail")
}

/// Create a task from a magnet or URL
pub fn create_task(uri: &str) -> ApiRequest {
    task(Method::Post, "create").param("uri", uri)
}

/// Create a task from a `.torrent` payload
pub fn create_task_from_file(file: FileUpload) -> ApiRequest {
    task(Method::Post, "create").file(file)
}

pub fn pause_tasks(ids: &[String]) -> ApiRequest {
    task(Method::Get, "pause").param("id", ids.join(","))
}

pub fn resume_tasks(ids: &[String]) -> ApiRequest {
    task(Method::Get, "resume").param("id", ids.join(","))
}

pub fn delete_tasks(ids: &[String]) -> ApiRequest {
    task(Method::Get, "delete")
        .param("id", ids.join(","))
        .param("force_complete", false)
}

pub fn statistics() -> ApiRequest {
    ApiRequest::new(Method::Get, STATISTIC_PATH)
        .param("api", STATISTIC_API)
        .param("method", "getinfo")
        .param("version", 1)
}

/// Compound request listing the profiles of every VPN protocol
pub fn vpn_profiles() -> ApiRequest {
    let lists: Vec<_> = VPN_APIS
        .iter()
        .map(|api| {
            json!({
                "api": api,
                "method": "list",
                "version": 1,
                "additional": ["status"],
            })
        })
        .collect();

    let compound = json!([{
        "api": ENTRY_API,
        "method": "request",
        "version": 1,
        "stopwhenerror": false,
        "compound": lists,
    }]);

    ApiRequest::new(Method::Post, ENTRY_PATH)
        .param("api", ENTRY_API)
        .param("method", "request")
        .param("version", 1)
        .param("stopwhenerror", false)
        .param("compound", compound)
}

/// Start a remote torrent search
pub fn search_start(keyword: &str) -> ApiRequest {
    ApiRequest::new(Method::Get, ENTRY_PATH)
        .param("api", SEARCH_API)
        .param("method", "start")
        .param("version", 1)
        .param("keyword", keyword)
}

/// Results of a running search, most seeded first
pub fn search_list(search_id: &str) -> ApiRequest {
    let compound = json!([{
        "api": SEARCH_API,
        "method": "list",
        "version": 1,
        "sort_by": "seeds",
        "order": "DESC",
        "offset": 0,
        "limit": SEARCH_PAGE_SIZE,
        "id": search_id,
    }]);

    ApiRequest::new(Method::Get, ENTRY_PATH)
        .param("api", ENTRY_API)
        .param("method", "request")
        .param("version", 1)
        .param("stop_when_error", false)
        .param("mode", "sequential")
        .param("compound", compound)
}
