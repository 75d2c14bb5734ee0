use std::path::PathBuf;

use serde_json::json;

use crate::db;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{require_db, str_param};
use crate::ipc::types::{AppState, Request};

fn handle_health(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
    }))
}

fn handle_workspace_select(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let path = PathBuf::from(str_param(&req.params, "path")?);

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            Ok(json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => Err(HandlerErr::new("db_open_failed", format!("{e:?}"))),
    }
}

fn handle_settings_get(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let key = str_param(&req.params, "key")?;
    let value = db::settings_get_json(conn, &key)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "key": key, "value": value }))
}

fn handle_settings_set(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let key = str_param(&req.params, "key")?;
    let Some(value) = req.params.get("value") else {
        return Err(HandlerErr::new("bad_params", "missing value"));
    };
    db::settings_set_json(conn, &key, value)
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let out = match req.method.as_str() {
        "health" => handle_health(state, req),
        "workspace.select" => handle_workspace_select(state, req),
        "settings.get" => handle_settings_get(state, req),
        "settings.set" => handle_settings_set(state, req),
        _ => return None,
    };
    Some(match out {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
