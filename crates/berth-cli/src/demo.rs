//! Built-in demo services.
//!
//! The shipped binary registers these so a fresh deployment has something
//! to point a client at. Library embedders build their own catalog instead.

use berth_host::{ParamSpec, ParamType, ServiceBuilder, ServiceCatalog};
use serde_json::json;

/// Catalog holding the demo implementations.
pub fn builtin_catalog() -> ServiceCatalog {
    let mut catalog = ServiceCatalog::new();

    catalog.register("berth.demo.EchoService", || {
        ServiceBuilder::new("berth.demo.EchoService")
            .describe("echoes arguments back to the caller")
            .method(
                "echo",
                vec![ParamSpec::required("message", ParamType::Mixed)],
                |args| Ok(args[0].clone()),
            )
            .method("ping", vec![], |_| Ok(json!("pong")))
            .build()
    });

    catalog.register("berth.demo.CalcService", || {
        ServiceBuilder::new("berth.demo.CalcService")
            .describe("small integer and float arithmetic")
            .method(
                "add",
                vec![
                    ParamSpec::required("a", ParamType::Int),
                    ParamSpec::required("b", ParamType::Int),
                ],
                |args| {
                    let a = args[0].as_i64().unwrap_or(0);
                    let b = args[1].as_i64().unwrap_or(0);
                    Ok(json!(a + b))
                },
            )
            .method(
                "div",
                vec![
                    ParamSpec::required("a", ParamType::Float),
                    ParamSpec::required("b", ParamType::Float),
                ],
                |args| {
                    let a = args[0].as_f64().unwrap_or(0.0);
                    let b = args[1].as_f64().unwrap_or(0.0);
                    if b == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    Ok(json!(a / b))
                },
            )
            .build()
    });

    catalog
}
