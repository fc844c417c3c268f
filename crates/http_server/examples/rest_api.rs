use std::sync::Arc;

use ember_http_server::{
    CorsConfig, HttpServer, HttpServerConfig, MemorySessionStorage, Method, SessionManager,
    StatusCode,
};

fn main() {
    ember_http_server::init_logger();

    let config = HttpServerConfig {
        port: 8080,
        thread_num: 4,
        tls: None,
        cors: Some(CorsConfig::default()),
    };
    let mut server = HttpServer::new(config);

    server.get("/", |_req, resp| {
        resp.set_status(StatusCode::OK);
        resp.set_content_type("text/html; charset=utf-8");
        resp.set_body("<h1>It works</h1><p>Try /api/status, /api/echo or /api/users/42</p>");
        Ok(())
    });

    server.get("/api/status", |_req, resp| {
        resp.set_status(StatusCode::OK);
        resp.set_content_type("application/json");
        resp.set_body(r#"{"status":"running","version":"1.0.0"}"#);
        Ok(())
    });

    server.post("/api/echo", |req, resp| {
        resp.set_status(StatusCode::OK);
        resp.set_content_type("application/octet-stream");
        resp.set_body(req.body.clone());
        Ok(())
    });

    server
        .router_mut()
        .add_regex_callback(Method::Get, "/api/users/:id", |req, resp| {
            let id = req.path_param("param1").unwrap_or("?");
            resp.set_status(StatusCode::OK);
            resp.set_content_type("application/json");
            resp.set_body(format!(r#"{{"id":"{id}","name":"user {id}"}}"#));
            Ok(())
        });

    let sessions = Arc::new(SessionManager::new(Box::new(MemorySessionStorage::new())));
    server.get("/api/visits", move |req, resp| {
        let mut session = sessions.session(req, resp);
        let visits: u64 = session.get("visits").and_then(|v| v.parse().ok()).unwrap_or(0) + 1;
        session.set("visits", visits.to_string());
        sessions.save(&session);
        resp.set_status(StatusCode::OK);
        resp.set_content_type("application/json");
        resp.set_body(format!(r#"{{"visits":{visits}}}"#));
        Ok(())
    });

    server.start();
}
