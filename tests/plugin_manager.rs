//! Integration tests for plugin lifecycle, collection, and pipelines

use agent_plugin_host::config::HostConfig;
use agent_plugin_host::plugins::types::{
    AssistantResponse, HookContext, McpServerDescriptor, McpTransport, MessageDecision,
    OutgoingMessage, Skill, SystemPrompt, ToolCall, ToolCallDecision, ToolExecutionResult,
};
use agent_plugin_host::plugins::context::ExecOptions;
use agent_plugin_host::plugins::{
    BasicPlugin, FnToolHandler, NativeModules, Permission, Plugin, PluginError, PluginEvent,
    PluginHooks, PluginManager, PluginState, PluginTool, ProviderAdapter,
};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

struct Fixture {
    root: TempDir,
    native: NativeModules,
    host_version: String,
}

impl Fixture {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("workspace")).unwrap();
        Self {
            root,
            native: NativeModules::new(),
            host_version: "1.0.0".to_string(),
        }
    }

    fn config(&self) -> HostConfig {
        let mut config = HostConfig::rooted_at(self.root.path());
        config.host_version = self.host_version.clone();
        config
    }

    /// Write a package directory and register `plugin` as its module
    fn add(&mut self, name: &str, extension: Value, plugin: Arc<dyn Plugin>) -> PathBuf {
        let dir = write_package(&self.root.path().join("src"), name, extension);
        self.native.register_plugin(name, move || plugin.clone());
        dir
    }

    fn manager(&self) -> PluginManager {
        PluginManager::new(self.config(), Arc::new(self.native.clone())).unwrap()
    }
}

fn write_package(parent: &Path, name: &str, extension: Value) -> PathBuf {
    let dir = parent.join(name);
    std::fs::create_dir_all(dir.join("dist")).unwrap();
    std::fs::write(dir.join("dist").join("index.js"), "// entry").unwrap();
    let descriptor = json!({ "name": name, "version": "1.0.0", "extension": extension });
    std::fs::write(
        dir.join("package.json"),
        serde_json::to_string_pretty(&descriptor).unwrap(),
    )
    .unwrap();
    dir
}

fn extension(name: &str) -> Value {
    json!({ "displayName": name })
}

async fn install_and_activate(manager: &mut PluginManager, dir: &Path) -> String {
    let entry = manager.install_from_local_path(dir).await.unwrap();
    manager.activate_plugin(&entry.id).await.unwrap();
    entry.id
}

/// Appends its name to messages and records every call
struct Recorder {
    name: &'static str,
    log: Log,
    cancel: bool,
}

impl Recorder {
    fn hooks(name: &'static str, log: &Log, cancel: bool) -> Arc<dyn PluginHooks> {
        Arc::new(Self {
            name,
            log: log.clone(),
            cancel,
        })
    }

    fn record(&self, what: &str) {
        self.log.lock().unwrap().push(format!("{}:{}", self.name, what));
    }
}

#[async_trait]
impl PluginHooks for Recorder {
    async fn before_message(
        &self,
        _ctx: &HookContext,
        mut message: OutgoingMessage,
    ) -> anyhow::Result<MessageDecision> {
        self.record("before");
        message.content.push_str(&format!("+{}", self.name));
        Ok(if self.cancel {
            MessageDecision::cancel(message)
        } else {
            MessageDecision::proceed(message)
        })
    }

    async fn after_response(
        &self,
        _ctx: &HookContext,
        mut response: AssistantResponse,
    ) -> anyhow::Result<AssistantResponse> {
        self.record("after");
        response.content.push_str(&format!("+{}", self.name));
        Ok(response)
    }

    async fn before_tool_call(
        &self,
        _ctx: &HookContext,
        call: ToolCall,
    ) -> anyhow::Result<ToolCallDecision> {
        self.record("tool");
        if self.cancel {
            Ok(ToolCallDecision::cancel(call.params, format!("blocked by {}", self.name)))
        } else {
            let mut params = call.params;
            params[self.name] = json!(true);
            Ok(ToolCallDecision::proceed(params))
        }
    }

    async fn after_tool_call(
        &self,
        _ctx: &HookContext,
        _call: &ToolCall,
        _result: &ToolExecutionResult,
    ) -> anyhow::Result<()> {
        self.record("done");
        Ok(())
    }
}

/// Failing hook used to prove isolation
struct Broken;

#[async_trait]
impl PluginHooks for Broken {
    async fn before_message(
        &self,
        _ctx: &HookContext,
        _message: OutgoingMessage,
    ) -> anyhow::Result<MessageDecision> {
        anyhow::bail!("hook exploded")
    }
}

fn hooked(id: &'static str, priority: i32, hooks: Arc<dyn PluginHooks>) -> Arc<dyn Plugin> {
    Arc::new(
        BasicPlugin::builder(id, "1.0.0")
            .priority(priority)
            .hooks(hooks)
            .build(),
    )
}

fn echo_tool(name: &str, reply: &'static str) -> PluginTool {
    PluginTool::new(
        name,
        "Echo the plugin id",
        json!({ "type": "object" }),
        Arc::new(FnToolHandler::new(move |params, ctx| {
            async move {
                Ok(ToolExecutionResult::success(json!({
                    "from": reply,
                    "params": params,
                    "conversation": ctx.conversation_id,
                })))
            }
            .boxed()
        })),
    )
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_activate_is_idempotent() {
    let mut fx = Fixture::new();
    let activations = Arc::new(AtomicUsize::new(0));
    let counter = activations.clone();

    let plugin = BasicPlugin::builder("pdf-tools", "1.0.0")
        .skill(Skill::bundled("pdf-extract", "Extract PDF text", "skills/pdf-extract"))
        .mcp_server(McpServerDescriptor {
            name: "pdf".into(),
            transport: McpTransport::Stdio {
                command: "servers/pdf".into(),
                args: vec![],
                env: HashMap::new(),
            },
            bundled: true,
        })
        .on_activate(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build();
    let dir = fx.add("pdf-tools", extension("PDF Tools"), Arc::new(plugin));
    std::fs::create_dir_all(dir.join("skills/pdf-extract")).unwrap();
    std::fs::write(dir.join("skills/pdf-extract/SKILL.md"), "# Extract").unwrap();

    let mut manager = fx.manager();
    let mut events = manager.subscribe();
    let id = install_and_activate(&mut manager, &dir).await;
    manager.activate_plugin(&id).await.unwrap();

    assert_eq!(activations.load(Ordering::SeqCst), 1);
    assert_eq!(manager.get_active_plugins().len(), 1);
    assert_eq!(manager.get_plugin(&id).unwrap().state, PluginState::Active);
    assert_eq!(manager.collect_plugin_mcp_servers().len(), 1);
    assert!(manager.skills_dir().join("pdf-extract/SKILL.md").is_file());

    assert_eq!(
        events.try_recv().unwrap(),
        PluginEvent::Activated { id: id.clone() }
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_existing_skill_is_not_overwritten() {
    let mut fx = Fixture::new();
    let plugin = BasicPlugin::builder("notes", "1.0.0")
        .skill(Skill::bundled("writing", "Writing guide", "skills/writing"))
        .build();
    let dir = fx.add("notes", extension("Notes"), Arc::new(plugin));
    std::fs::create_dir_all(dir.join("skills/writing")).unwrap();
    std::fs::write(dir.join("skills/writing/SKILL.md"), "plugin copy").unwrap();

    let skills = fx.root.path().join("skills/writing");
    std::fs::create_dir_all(&skills).unwrap();
    std::fs::write(skills.join("SKILL.md"), "user copy").unwrap();

    let mut manager = fx.manager();
    install_and_activate(&mut manager, &dir).await;

    assert_eq!(
        std::fs::read_to_string(skills.join("SKILL.md")).unwrap(),
        "user copy"
    );
    let collected = manager.collect_skills();
    assert_eq!(collected.len(), 1);
    assert_eq!(collected[0].plugin_id, "notes");
}

#[tokio::test]
async fn test_failed_skill_copy_removes_earlier_skills() {
    let mut fx = Fixture::new();
    let plugin = BasicPlugin::builder("docs", "1.0.0")
        .skill(Skill::bundled("outline", "Outline a document", "skills/outline"))
        .skill(Skill::bundled("summary", "Summarize a document", "skills/summary"))
        .build();
    let dir = fx.add("docs", extension("Docs"), Arc::new(plugin));
    std::fs::create_dir_all(dir.join("skills/outline")).unwrap();
    std::fs::write(dir.join("skills/outline/SKILL.md"), "# Outline").unwrap();

    let mut manager = fx.manager();
    let entry = manager.install_from_local_path(&dir).await.unwrap();
    let err = manager.activate_plugin(&entry.id).await.unwrap_err();
    assert!(matches!(err, PluginError::Activation { .. }));
    assert!(!manager.skills_dir().join("outline").exists());
    assert!(!manager.skills_dir().join("summary").exists());

    std::fs::create_dir_all(dir.join("skills/summary")).unwrap();
    std::fs::write(dir.join("skills/summary/SKILL.md"), "# Summary").unwrap();
    manager.activate_plugin(&entry.id).await.unwrap();
    assert!(manager.skills_dir().join("outline/SKILL.md").is_file());
    assert!(manager.skills_dir().join("summary/SKILL.md").is_file());
}

#[tokio::test]
async fn test_skill_outside_plugin_is_not_copied() {
    let mut fx = Fixture::new();
    let outside = fx.root.path().join("private");
    std::fs::create_dir_all(&outside).unwrap();
    std::fs::write(outside.join("SKILL.md"), "secret").unwrap();

    let plugin = BasicPlugin::builder("sneaky", "1.0.0")
        .skill(Skill::bundled("climb", "Climbs out", "../../private"))
        .skill(Skill::bundled("absolute", "Absolute path", outside.clone()))
        .build();
    let dir = fx.add("sneaky", extension("Sneaky"), Arc::new(plugin));

    let mut manager = fx.manager();
    install_and_activate(&mut manager, &dir).await;
    assert!(!manager.skills_dir().join("climb").exists());
    assert!(!manager.skills_dir().join("absolute").exists());
}

#[tokio::test]
async fn test_activation_failure_moves_to_error() {
    let mut fx = Fixture::new();
    let plugin = BasicPlugin::builder("flaky", "1.0.0")
        .on_activate(|_| anyhow::bail!("binary not found"))
        .build();
    let dir = fx.add("flaky", extension("Flaky"), Arc::new(plugin));

    let mut manager = fx.manager();
    let mut events = manager.subscribe();
    let entry = manager.install_from_local_path(&dir).await.unwrap();

    let err = manager.activate_plugin(&entry.id).await.unwrap_err();
    assert!(matches!(err, PluginError::Activation { .. }));

    let stored = manager.get_plugin("flaky").unwrap();
    assert_eq!(stored.state, PluginState::Error);
    assert!(stored.error.as_deref().unwrap().contains("binary not found"));
    assert!(!manager.is_active("flaky"));
    assert!(matches!(events.try_recv().unwrap(), PluginEvent::Error { .. }));
}

#[tokio::test]
async fn test_uninstall_deactivates_first() {
    let mut fx = Fixture::new();
    let log = new_log();
    let seen = log.clone();
    let plugin = BasicPlugin::builder("cleanup", "1.0.0")
        .on_deactivate(move || {
            seen.lock().unwrap().push("deactivated".into());
            Ok(())
        })
        .build();
    let dir = fx.add("cleanup", extension("Cleanup"), Arc::new(plugin));

    let mut manager = fx.manager();
    let mut events = manager.subscribe();
    let id = install_and_activate(&mut manager, &dir).await;
    let _ = events.try_recv();

    manager.uninstall(&id).await.unwrap();

    assert_eq!(entries(&log), vec!["deactivated"]);
    assert_eq!(
        events.try_recv().unwrap(),
        PluginEvent::Deactivated { id: id.clone() }
    );
    assert!(manager.get_plugins().is_empty());
    assert!(!manager.is_active(&id));
}

#[tokio::test]
async fn test_install_twice_is_rejected() {
    let mut fx = Fixture::new();
    let dir = fx.add(
        "once",
        extension("Once"),
        Arc::new(BasicPlugin::builder("once", "1.0.0").build()),
    );

    let mut manager = fx.manager();
    manager.install_from_local_path(&dir).await.unwrap();
    let err = manager.install_from_local_path(&dir).await.unwrap_err();
    assert!(matches!(err, PluginError::AlreadyInstalled(id) if id == "once"));
}

#[tokio::test]
async fn test_host_version_gate_on_install() {
    for (host, ok) in [("2.2.9", false), ("2.3.0", true), ("2.4.0", true)] {
        let mut fx = Fixture::new();
        fx.host_version = host.to_string();
        let dir = fx.add(
            "gated",
            json!({ "displayName": "Gated", "minHostVersion": "2.3.0" }),
            Arc::new(BasicPlugin::builder("gated", "1.0.0").build()),
        );

        let mut manager = fx.manager();
        let result = manager.install_from_local_path(&dir).await;
        assert_eq!(result.is_ok(), ok, "host {}", host);
        if !ok {
            assert!(matches!(result, Err(PluginError::IncompatibleHost { .. })));
            assert!(manager.get_plugins().is_empty());
        }
    }
}

#[tokio::test]
async fn test_registry_survives_restart() {
    let mut fx = Fixture::new();
    let activations = Arc::new(AtomicUsize::new(0));
    let counter = activations.clone();
    let plugin = BasicPlugin::builder("sticky", "1.0.0")
        .on_activate(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build();
    let dir = fx.add(
        "sticky",
        json!({ "displayName": "Sticky", "permissions": ["fs:read"] }),
        Arc::new(plugin),
    );

    let mut manager = fx.manager();
    let id = install_and_activate(&mut manager, &dir).await;
    manager.grant_permissions(&id, &[Permission::FsRead]).unwrap();
    manager.shutdown().await.unwrap();

    let mut restarted = fx.manager();
    restarted.initialize().await.unwrap();
    assert!(restarted.is_active(&id));
    assert_eq!(activations.load(Ordering::SeqCst), 2);
    assert!(restarted
        .get_plugin(&id)
        .unwrap()
        .has_permission(Permission::FsRead));
}

// =============================================================================
// Permissions and capability contexts
// =============================================================================

#[tokio::test]
async fn test_capability_context_follows_grants() {
    let mut fx = Fixture::new();
    let plugin = Arc::new(BasicPlugin::builder("scoped", "1.0.0").build());
    let dir = fx.add(
        "scoped",
        json!({ "displayName": "Scoped", "permissions": ["fs:read", "shell:execute"] }),
        plugin.clone(),
    );

    let mut manager = fx.manager();
    let entry = manager.install_from_local_path(&dir).await.unwrap();

    let err = manager
        .grant_permissions(&entry.id, &[Permission::FsWrite])
        .unwrap_err();
    assert!(matches!(err, PluginError::PermissionNotRequested { .. }));

    manager
        .grant_permissions(&entry.id, &[Permission::FsRead])
        .unwrap();
    manager.activate_plugin(&entry.id).await.unwrap();
    let ctx = plugin.context().unwrap();
    assert!(ctx.read_file.is_some());
    assert!(ctx.write_file.is_none());
    assert!(ctx.fetch.is_none());
    assert!(ctx.exec.is_none());

    manager
        .grant_permissions(&entry.id, &[Permission::ShellExecute])
        .unwrap();
    manager.deactivate_plugin(&entry.id).await.unwrap();
    manager.activate_plugin(&entry.id).await.unwrap();

    let exec = plugin.context().unwrap().exec.unwrap();
    if cfg!(unix) {
        let out = exec
            .exec("echo partial; echo failed >&2; exit 2", ExecOptions::default())
            .await
            .unwrap();
        assert_eq!(out.exit_code, 2);
        assert_eq!(out.stdout.trim(), "partial");
        assert_eq!(out.stderr.trim(), "failed");
    }

    let revoked = manager
        .revoke_permissions(&entry.id, &[Permission::ShellExecute])
        .unwrap();
    assert_eq!(revoked.len(), 1);
}

#[tokio::test]
async fn test_settings_seeded_and_merged() {
    let mut fx = Fixture::new();
    let dir = fx.add(
        "configurable",
        json!({
            "displayName": "Configurable",
            "settings": [
                { "key": "dpi", "type": "number", "default": 150 },
                { "key": "engine", "type": "select", "options": ["a", "b"], "default": "a" }
            ]
        }),
        Arc::new(BasicPlugin::builder("configurable", "1.0.0").build()),
    );

    let mut manager = fx.manager();
    let entry = manager.install_from_local_path(&dir).await.unwrap();
    assert_eq!(entry.settings.get("dpi"), Some(&json!(150)));

    let mut patch = serde_json::Map::new();
    patch.insert("dpi".into(), json!(300));
    let settings = manager.update_settings(&entry.id, patch).await.unwrap();
    assert_eq!(settings.get("dpi"), Some(&json!(300)));
    assert_eq!(settings.get("engine"), Some(&json!("a")));

    let raw = std::fs::read_to_string(fx.config().registry_file().unwrap()).unwrap();
    assert!(raw.contains("300"));
}

// =============================================================================
// Tools
// =============================================================================

#[tokio::test]
async fn test_execute_tool_on_inactive_plugin() {
    let mut fx = Fixture::new();
    let plugin = BasicPlugin::builder("acme", "1.0.0")
        .tool(echo_tool("frobnicate", "acme"))
        .build();
    let dir = fx.add("acme", extension("Acme"), Arc::new(plugin));

    let mut manager = fx.manager();
    let result = manager
        .execute_tool("plugin:acme:frobnicate", json!({}), "conv-1")
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("not active"));

    manager.install_from_local_path(&dir).await.unwrap();
    let result = manager
        .execute_tool("plugin:acme:frobnicate", json!({}), "conv-1")
        .await;
    assert!(result.error.unwrap().contains("not active"));
}

#[tokio::test]
async fn test_same_tool_name_in_two_plugins() {
    let mut fx = Fixture::new();
    let pdf = fx.add(
        "pdf-tools",
        extension("PDF"),
        Arc::new(
            BasicPlugin::builder("pdf-tools", "1.0.0")
                .tool(echo_tool("convert", "pdf-tools"))
                .build(),
        ),
    );
    let docx = fx.add(
        "docx-tools",
        extension("DOCX"),
        Arc::new(
            BasicPlugin::builder("docx-tools", "1.0.0")
                .tool(echo_tool("convert", "docx-tools"))
                .build(),
        ),
    );

    let mut manager = fx.manager();
    install_and_activate(&mut manager, &pdf).await;
    install_and_activate(&mut manager, &docx).await;

    let names: Vec<String> = manager
        .collect_plugin_tools(None)
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert!(names.contains(&"plugin:pdf-tools:convert".to_string()));
    assert!(names.contains(&"plugin:docx-tools:convert".to_string()));

    for id in ["pdf-tools", "docx-tools"] {
        let result = manager
            .execute_tool(&format!("plugin:{}:convert", id), json!({ "file": "a" }), "conv-9")
            .await;
        assert!(result.success, "{:?}", result.error);
        let data = result.data.unwrap();
        assert_eq!(data["from"], json!(id));
        assert_eq!(data["conversation"], json!("conv-9"));
    }
}

#[tokio::test]
async fn test_tool_errors_become_failures() {
    let mut fx = Fixture::new();
    let failing = PluginTool::new(
        "explode",
        "Always fails",
        json!({}),
        Arc::new(FnToolHandler::new(|_, _| {
            async { Err(anyhow::anyhow!("disk full")) }.boxed()
        })),
    );
    let dir = fx.add(
        "fragile",
        extension("Fragile"),
        Arc::new(BasicPlugin::builder("fragile", "1.0.0").tool(failing).build()),
    );

    let mut manager = fx.manager();
    install_and_activate(&mut manager, &dir).await;

    let result = manager
        .execute_tool("plugin:fragile:explode", json!({}), "c")
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("disk full"));

    let result = manager
        .execute_tool("plugin:fragile:missing", json!({}), "c")
        .await;
    assert!(result.error.unwrap().contains("no tool named"));

    let result = manager.execute_tool("fragile:explode", json!({}), "c").await;
    assert!(result.error.unwrap().contains("Invalid plugin tool name"));
}

#[tokio::test]
async fn test_tool_provider_filter() {
    let mut fx = Fixture::new();
    let dir = fx.add(
        "picky",
        extension("Picky"),
        Arc::new(
            BasicPlugin::builder("picky", "1.0.0")
                .tool(echo_tool("everywhere", "picky"))
                .tool(echo_tool("claude-only", "picky").for_providers(["claude"]))
                .build(),
        ),
    );

    let mut manager = fx.manager();
    install_and_activate(&mut manager, &dir).await;

    assert_eq!(manager.collect_plugin_tools(Some("claude")).len(), 2);
    assert_eq!(manager.collect_plugin_tools(Some("gemini")).len(), 1);

    manager.set_active_provider(Some("claude".into()));
    assert_eq!(manager.collect_plugin_tools(None).len(), 2);
}

// =============================================================================
// Prompts and pipelines
// =============================================================================

#[tokio::test]
async fn test_system_prompts_sorted_by_priority() {
    let mut fx = Fixture::new();
    let dir = fx.add(
        "prompts",
        extension("Prompts"),
        Arc::new(
            BasicPlugin::builder("prompts", "1.0.0")
                .system_prompt(SystemPrompt::new("late").with_priority(300))
                .system_prompt(SystemPrompt::new("early").with_priority(5))
                .system_prompt(SystemPrompt::new("default"))
                .system_prompt(SystemPrompt::new("gemini only").for_providers(["gemini"]))
                .build(),
        ),
    );

    let mut manager = fx.manager();
    install_and_activate(&mut manager, &dir).await;

    assert_eq!(
        manager.collect_system_prompts(Some("claude")),
        vec!["early", "default", "late"]
    );
    assert_eq!(manager.collect_system_prompts(Some("gemini")).len(), 4);
}

#[tokio::test]
async fn test_hook_order_is_symmetric() {
    let mut fx = Fixture::new();
    let log = new_log();
    // Installed in reverse priority order on purpose
    let p2 = fx.add("p2", extension("P2"), hooked("p2", 20, Recorder::hooks("p2", &log, false)));
    let p1 = fx.add("p1", extension("P1"), hooked("p1", 10, Recorder::hooks("p1", &log, false)));

    let mut manager = fx.manager();
    install_and_activate(&mut manager, &p2).await;
    install_and_activate(&mut manager, &p1).await;

    let ctx = HookContext::default();
    let result = manager
        .run_before_message_hooks(&ctx, OutgoingMessage::new("hi"))
        .await;
    assert!(!result.cancelled);
    assert_eq!(result.message.content, "hi+p1+p2");

    let response = manager
        .run_after_response_hooks(&ctx, AssistantResponse::new("ok"))
        .await;
    assert_eq!(response.content, "ok+p2+p1");

    assert_eq!(
        entries(&log),
        vec!["p1:before", "p2:before", "p2:after", "p1:after"]
    );
}

#[tokio::test]
async fn test_cancellation_stops_later_hooks() {
    let mut fx = Fixture::new();
    let log = new_log();
    let p1 = fx.add("p1", extension("P1"), hooked("p1", 10, Recorder::hooks("p1", &log, true)));
    let p2 = fx.add("p2", extension("P2"), hooked("p2", 20, Recorder::hooks("p2", &log, false)));

    let mut manager = fx.manager();
    install_and_activate(&mut manager, &p1).await;
    install_and_activate(&mut manager, &p2).await;

    let ctx = HookContext::default();
    let result = manager
        .run_before_message_hooks(&ctx, OutgoingMessage::new("hi"))
        .await;
    assert!(result.cancelled);
    assert_eq!(result.cancelled_by.as_deref(), Some("p1"));
    assert_eq!(result.message.content, "hi+p1");

    let call = ToolCall {
        name: "plugin:x:y".into(),
        params: json!({}),
    };
    let tool_result = manager.run_before_tool_call_hooks(&ctx, call).await;
    assert!(tool_result.cancelled);
    assert_eq!(tool_result.reason.as_deref(), Some("blocked by p1"));

    assert_eq!(entries(&log), vec!["p1:before", "p1:tool"]);
}

#[tokio::test]
async fn test_tool_call_hooks_rewrite_and_notify() {
    let mut fx = Fixture::new();
    let log = new_log();
    let a = fx.add("a", extension("A"), hooked("a", 1, Recorder::hooks("a", &log, false)));
    let b = fx.add("b", extension("B"), hooked("b", 2, Recorder::hooks("b", &log, false)));

    let mut manager = fx.manager();
    install_and_activate(&mut manager, &a).await;
    install_and_activate(&mut manager, &b).await;

    let ctx = HookContext::default();
    let call = ToolCall {
        name: "read".into(),
        params: json!({ "path": "x" }),
    };
    let result = manager.run_before_tool_call_hooks(&ctx, call.clone()).await;
    assert!(!result.cancelled);
    assert_eq!(result.params, json!({ "path": "x", "a": true, "b": true }));

    manager
        .run_after_tool_call_hooks(&ctx, &call, &ToolExecutionResult::success("done"))
        .await;
    assert_eq!(entries(&log), vec!["a:tool", "b:tool", "a:done", "b:done"]);
}

#[tokio::test]
async fn test_failing_hook_does_not_block_others() {
    let mut fx = Fixture::new();
    let log = new_log();
    let broken = fx.add("broken", extension("Broken"), hooked("broken", 1, Arc::new(Broken)));
    let fine = fx.add("fine", extension("Fine"), hooked("fine", 2, Recorder::hooks("fine", &log, false)));

    let mut manager = fx.manager();
    install_and_activate(&mut manager, &broken).await;
    install_and_activate(&mut manager, &fine).await;

    let result = manager
        .run_before_message_hooks(&HookContext::default(), OutgoingMessage::new("hi"))
        .await;
    assert!(!result.cancelled);
    assert_eq!(result.message.content, "hi+fine");
}

/// Pushes its tag onto `trail` in both directions
struct Tagger(&'static str);

#[async_trait]
impl ProviderAdapter for Tagger {
    async fn transform_request(&self, mut body: Value) -> anyhow::Result<Value> {
        push_tag(&mut body, self.0);
        Ok(body)
    }

    async fn transform_response(&self, mut body: Value) -> anyhow::Result<Value> {
        push_tag(&mut body, self.0);
        Ok(body)
    }

    fn tools(&self) -> Vec<agent_plugin_host::plugins::types::ToolSpec> {
        vec![agent_plugin_host::plugins::types::ToolSpec {
            name: format!("{}_native", self.0),
            description: String::new(),
            parameters: json!({}),
        }]
    }

    fn system_prompt(&self) -> Option<String> {
        Some(format!("{} fragment", self.0))
    }
}

fn push_tag(body: &mut Value, tag: &str) {
    if let Some(trail) = body["trail"].as_array_mut() {
        trail.push(json!(tag));
    }
}

#[tokio::test]
async fn test_adapter_transforms_mirror_each_other() {
    let mut fx = Fixture::new();
    let first = fx.add(
        "first",
        extension("First"),
        Arc::new(
            BasicPlugin::builder("first", "1.0.0")
                .priority(10)
                .adapter("claude", Arc::new(Tagger("first")))
                .build(),
        ),
    );
    // Second one gets its adapter from the manifest's adapter map
    let second = fx.add(
        "second",
        json!({ "displayName": "Second", "adapters": { "claude": "./adapters/claude" } }),
        Arc::new(BasicPlugin::builder("second", "1.0.0").priority(20).build()),
    );
    std::fs::create_dir_all(second.join("adapters")).unwrap();
    std::fs::write(second.join("adapters/claude.js"), "// adapter").unwrap();
    fx.native
        .register_adapter("second", "claude", || Arc::new(Tagger("second")) as Arc<dyn ProviderAdapter>);

    let mut manager = fx.manager();
    install_and_activate(&mut manager, &first).await;
    install_and_activate(&mut manager, &second).await;

    let request = manager
        .transform_request("claude", json!({ "trail": [] }))
        .await;
    assert_eq!(request["trail"], json!(["first", "second"]));

    let response = manager
        .transform_response("claude", json!({ "trail": [] }))
        .await;
    assert_eq!(response["trail"], json!(["second", "first"]));

    let untouched = manager
        .transform_request("gemini", json!({ "trail": [] }))
        .await;
    assert_eq!(untouched["trail"], json!([]));

    assert_eq!(
        manager.collect_adapter_prompts("claude"),
        vec!["first fragment", "second fragment"]
    );
    assert_eq!(manager.collect_adapter_tools("claude").len(), 2);
    assert!(manager.collect_adapter_tools("gemini").is_empty());
}

// =============================================================================
// Process-backed plugins
// =============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_process_plugin_end_to_end() {
    use agent_plugin_host::plugins::process_module_loader;
    use std::os::unix::fs::PermissionsExt;

    let fx = Fixture::new();
    let dir = fx.root.path().join("src").join("shell-tools");
    std::fs::create_dir_all(dir.join("bin")).unwrap();
    std::fs::write(
        dir.join("package.json"),
        serde_json::to_string_pretty(&json!({
            "name": "shell-tools",
            "version": "0.3.0",
            "main": "./bin/plugin",
            "extension": { "displayName": "Shell Tools", "capabilities": { "tools": true } }
        }))
        .unwrap(),
    )
    .unwrap();

    let script = dir.join("bin").join("plugin");
    std::fs::write(
        &script,
        r#"#!/bin/sh
read req
case "$req" in
  *'"method":"describe"'*)
    echo '{"id":"shell-tools","version":"0.3.0","system_prompts":[{"content":"Use shell tools."}],"tools":[{"name":"count","description":"Count words"}]}' ;;
  *'"method":"tool"'*)
    echo '{"success":true,"data":3}' ;;
  *) echo '{}' ;;
esac
"#,
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let config = fx.config();
    let mut manager = PluginManager::new(config.clone(), process_module_loader(&config)).unwrap();
    let id = install_and_activate(&mut manager, &dir).await;
    assert_eq!(id, "shell-tools");

    assert_eq!(manager.collect_system_prompts(None), vec!["Use shell tools."]);
    let result = manager
        .execute_tool("plugin:shell-tools:count", json!({ "text": "a b c" }), "conv")
        .await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.data, Some(json!(3)));

    manager.deactivate_plugin(&id).await.unwrap();
    assert_eq!(manager.get_plugin(&id).unwrap().state, PluginState::Inactive);
}
