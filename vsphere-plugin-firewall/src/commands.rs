//! MQTT command contract of the firewall plugin
//!
//! Listens: vsphere/firewall/command@v1
//! Publishes: vsphere/firewall/response@v1
//!
//! ```json
//! {"action": "set_firewall_ruleset", "request_id": "42",
//!  "host": "vcenter.lab", "username": "root", "password": "...",
//!  "ruleset_enable": true, "ruleset_name": "syslog",
//!  "esxi_hosts": ["esxi-1.lab", "esxi-2.lab"]}
//! ```

use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, QoS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};
use vsphere_fanout::{ConnectionParameters, FirewallModule, RemoteInvoker};

pub const COMMAND_TOPIC: &str = "vsphere/firewall/command@v1";
pub const RESPONSE_TOPIC: &str = "vsphere/firewall/response@v1";

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action")]
pub enum FirewallCommand {
    #[serde(rename = "get_firewall_status")]
    GetFirewallStatus {
        #[serde(default = "new_request_id")]
        request_id: String,
        #[serde(flatten)]
        connection: ConnectionParameters,
        #[serde(default)]
        esxi_hosts: Option<Value>,
    },
    #[serde(rename = "set_firewall_ruleset")]
    SetFirewallRuleset {
        #[serde(default = "new_request_id")]
        request_id: String,
        #[serde(flatten)]
        connection: ConnectionParameters,
        // left loose so bad values surface as configuration errors
        #[serde(default)]
        ruleset_enable: Value,
        #[serde(default)]
        ruleset_name: String,
        #[serde(default)]
        esxi_hosts: Option<Value>,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum FirewallResponse {
    #[serde(rename = "success")]
    Success {
        request_id: String,
        action: String,
        data: Value,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "error")]
    Error {
        request_id: String,
        action: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl FirewallResponse {
    fn from_result<T: Serialize, E: std::fmt::Display>(
        request_id: String,
        action: &str,
        result: Result<T, E>,
    ) -> Self {
        let data = match result {
            Ok(aggregate) => serde_json::to_value(aggregate).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match data {
            Ok(data) => FirewallResponse::Success {
                request_id,
                action: action.to_string(),
                data,
                timestamp: Utc::now(),
            },
            Err(error) => FirewallResponse::Error {
                request_id,
                action: action.to_string(),
                error,
                timestamp: Utc::now(),
            },
        }
    }
}

/// Runs one command and builds its response
pub async fn process_command<I: RemoteInvoker>(
    module: &FirewallModule<I>,
    command: FirewallCommand,
) -> FirewallResponse {
    match command {
        FirewallCommand::GetFirewallStatus {
            request_id,
            connection,
            esxi_hosts,
        } => {
            info!("[{}] get_firewall_status via {}", request_id, connection.host);
            let result = module
                .get_firewall_status(&connection, esxi_hosts.as_ref())
                .await;
            FirewallResponse::from_result(request_id, "get_firewall_status", result)
        }

        FirewallCommand::SetFirewallRuleset {
            request_id,
            connection,
            ruleset_enable,
            ruleset_name,
            esxi_hosts,
        } => {
            info!(
                "[{}] set_firewall_ruleset {}={} via {}",
                request_id, ruleset_name, ruleset_enable, connection.host
            );
            let result = module
                .set_firewall_ruleset(&connection, &ruleset_enable, &ruleset_name, esxi_hosts.as_ref())
                .await;
            FirewallResponse::from_result(request_id, "set_firewall_ruleset", result)
        }
    }
}

/// Decodes a raw MQTT payload; undecodable payloads get a `parse` error response
pub async fn respond_to_payload<I: RemoteInvoker>(
    module: &FirewallModule<I>,
    payload: &[u8],
) -> FirewallResponse {
    match serde_json::from_slice::<FirewallCommand>(payload) {
        Ok(command) => process_command(module, command).await,
        Err(e) => FirewallResponse::Error {
            request_id: "unknown".to_string(),
            action: "parse".to_string(),
            error: format!("Invalid command JSON: {}", e),
            timestamp: Utc::now(),
        },
    }
}

/// Handles one MQTT message end to end
pub async fn handle_command<I: RemoteInvoker>(
    client: AsyncClient,
    module: Arc<FirewallModule<I>>,
    payload: Vec<u8>,
) {
    let response = respond_to_payload(&module, &payload).await;

    match serde_json::to_string(&response) {
        Ok(response_json) => {
            debug!("Publishing {} bytes on {}", response_json.len(), RESPONSE_TOPIC);
            if let Err(e) = client
                .publish(RESPONSE_TOPIC, QoS::AtLeastOnce, false, response_json)
                .await
            {
                error!("Failed to publish response: {}", e);
            }
        }
        Err(e) => error!("Failed to serialize response: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vsphere_fanout::invoker::scripted::ScriptedInvoker;
    use vsphere_fanout::FanoutEngine;

    fn module(invoker: ScriptedInvoker) -> FirewallModule<ScriptedInvoker> {
        FirewallModule::new(FanoutEngine::new(invoker), true)
    }

    fn to_json(response: &FirewallResponse) -> Value {
        serde_json::to_value(response).unwrap()
    }

    #[test]
    fn test_command_decoding_defaults() {
        let command: FirewallCommand = serde_json::from_value(json!({
            "action": "get_firewall_status",
            "endpoint": "esxi-1.lab",
            "username": "root",
            "password": "pw"
        }))
        .unwrap();

        match command {
            FirewallCommand::GetFirewallStatus {
                request_id,
                connection,
                esxi_hosts,
            } => {
                assert_eq!(request_id.len(), 36);
                assert_eq!(connection.host, "esxi-1.lab");
                assert_eq!(connection.port, 443);
                assert!(esxi_hosts.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_status_response_keeps_host_order() {
        let firewall = module(
            ScriptedInvoker::new()
                .reply("esxi-b", 0, "Name Enabled\nsyslog true\n")
                .reply("esxi-a", 1, "Error: unreachable"),
        );
        let payload = json!({
            "action": "get_firewall_status",
            "request_id": "req-1",
            "host": "vcenter.lab",
            "username": "root",
            "password": "pw",
            "esxi_hosts": ["esxi-b", "esxi-a"]
        });

        let response = respond_to_payload(&firewall, payload.to_string().as_bytes()).await;
        let rendered = serde_json::to_string(&response).unwrap();
        let value = to_json(&response);

        assert_eq!(value["type"], "success");
        assert_eq!(value["request_id"], "req-1");
        assert_eq!(value["action"], "get_firewall_status");
        assert_eq!(value["data"]["esxi-b"]["rulesets"][0]["name"], "syslog");
        assert_eq!(value["data"]["esxi-a"]["error"], "Error: unreachable");
        assert!(rendered.find("esxi-b").unwrap() < rendered.find("esxi-a").unwrap());
    }

    #[tokio::test]
    async fn test_scalar_host_list_is_an_error_response() {
        let firewall = module(ScriptedInvoker::new());
        let payload = json!({
            "action": "get_firewall_status",
            "request_id": "req-2",
            "host": "vcenter.lab",
            "username": "root",
            "password": "pw",
            "esxi_hosts": "esxi-1"
        });

        let value = to_json(&respond_to_payload(&firewall, payload.to_string().as_bytes()).await);

        assert_eq!(value["type"], "error");
        assert!(value["error"].as_str().unwrap().contains("Configuration error"));
        assert_eq!(firewall.engine().invoker().call_count(), 0);
    }

    #[tokio::test]
    async fn test_toggle_round_trip() {
        let firewall = module(ScriptedInvoker::new().reply("esxi-1", 0, ""));
        let command = FirewallCommand::SetFirewallRuleset {
            request_id: "req-3".to_string(),
            connection: ConnectionParameters::new("vcenter.lab", "root", "pw"),
            ruleset_enable: json!("True"),
            ruleset_name: "syslog".to_string(),
            esxi_hosts: Some(json!(["esxi-1"])),
        };

        let value = to_json(&process_command(&firewall, command).await);

        assert_eq!(value["type"], "success");
        assert_eq!(value["data"], json!({"esxi-1": {"return_code": 0, "stdout": "", "stderr": ""}}));
        let calls = firewall.engine().invoker().calls();
        assert!(calls[0].command.words().contains(&"--ruleset-id=syslog".to_string()));
    }

    #[tokio::test]
    async fn test_toggle_without_name_is_rejected() {
        let firewall = module(ScriptedInvoker::new());
        let payload = json!({
            "action": "set_firewall_ruleset",
            "host": "esxi-1.lab",
            "username": "root",
            "password": "pw",
            "ruleset_enable": true
        });

        let value = to_json(&respond_to_payload(&firewall, payload.to_string().as_bytes()).await);

        assert_eq!(value["type"], "error");
        assert_eq!(value["action"], "set_firewall_ruleset");
        assert!(value["error"].as_str().unwrap().contains("ruleset_name"));
        assert_eq!(firewall.engine().invoker().call_count(), 0);
    }

    #[tokio::test]
    async fn test_garbage_payload() {
        let firewall = module(ScriptedInvoker::new());

        let value = to_json(&respond_to_payload(&firewall, b"{not json").await);

        assert_eq!(value["type"], "error");
        assert_eq!(value["action"], "parse");
        assert_eq!(value["request_id"], "unknown");
    }

    #[tokio::test]
    async fn test_unavailable_module_reports_error() {
        let firewall = FirewallModule::new(FanoutEngine::new(ScriptedInvoker::new()), false);
        let command = FirewallCommand::GetFirewallStatus {
            request_id: "req-4".to_string(),
            connection: ConnectionParameters::new("esxi-1.lab", "root", "pw"),
            esxi_hosts: None,
        };

        let value = to_json(&process_command(&firewall, command).await);

        assert_eq!(value["type"], "error");
        assert!(value["error"].as_str().unwrap().contains("Module unavailable"));
    }
}
