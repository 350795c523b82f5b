//! Scripted in-memory engine for tests.
//!
//! Behaves like a small subset of libmpv (loadfile, seek, sub-add,
//! screenshot-to-file, property storage) and records every native call so
//! tests can check which engine writes happened.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    status, EngineBackend, EngineBridge, EngineOptions, NativeStatus, Node, PropertyFormat,
    PropertyValue,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetOption(String, String),
    Initialize,
    Command(Vec<String>),
    GetProperty(String),
    SetProperty(String, PropertyValue),
    Destroy,
}

struct FakeState {
    properties: HashMap<String, PropertyValue>,
    calls: Vec<Call>,
    rejected_options: HashSet<String>,
    failing_commands: HashSet<String>,
    failing_reads: HashMap<String, NativeStatus>,
    init_failure: Option<NativeStatus>,
    media: HashMap<String, f64>,
}

#[derive(Clone)]
pub struct FakeEngine {
    state: Arc<Mutex<FakeState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        let mut properties = HashMap::new();
        properties.insert("pause".to_string(), PropertyValue::Flag(false));
        properties.insert("mute".to_string(), PropertyValue::Flag(false));
        properties.insert("volume".to_string(), PropertyValue::Int64(100));
        properties.insert("speed".to_string(), PropertyValue::Double(1.0));
        properties.insert("video-zoom".to_string(), PropertyValue::Double(0.0));
        properties.insert("video-pan-x".to_string(), PropertyValue::Double(0.0));
        properties.insert("video-pan-y".to_string(), PropertyValue::Double(0.0));
        properties.insert("audio-delay".to_string(), PropertyValue::Double(0.0));
        properties.insert("sub-delay".to_string(), PropertyValue::Double(0.0));
        properties.insert("sub-font".to_string(), PropertyValue::String("sans-serif".into()));
        properties.insert("sub-font-size".to_string(), PropertyValue::Int64(55));
        properties.insert("track-list".to_string(), PropertyValue::Node(Node::Array(Vec::new())));

        Self {
            state: Arc::new(Mutex::new(FakeState {
                properties,
                calls: Vec::new(),
                rejected_options: HashSet::new(),
                failing_commands: HashSet::new(),
                failing_reads: HashMap::new(),
                init_failure: None,
                media: HashMap::new(),
            })),
        }
    }

    /// A backend sharing this engine's state.
    pub fn boxed(&self) -> Box<dyn EngineBackend> {
        Box::new(self.clone())
    }

    /// An initialized bridge over this engine with default options.
    pub fn bridge(&self) -> EngineBridge {
        EngineBridge::initialize(self.boxed(), &EngineOptions::default()).unwrap()
    }

    /// Register media that `loadfile` can open, with its duration.
    pub fn add_media(&self, path: &str, duration: f64) {
        self.state.lock().media.insert(path.to_string(), duration);
    }

    pub fn set(&self, name: &str, value: PropertyValue) {
        self.state.lock().properties.insert(name.to_string(), value);
    }

    pub fn remove(&self, name: &str) {
        self.state.lock().properties.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<PropertyValue> {
        self.state.lock().properties.get(name).cloned()
    }

    pub fn get_f64(&self, name: &str) -> f64 {
        match self.get(name) {
            Some(PropertyValue::Double(v)) => v,
            Some(PropertyValue::Int64(v)) => v as f64,
            other => panic!("{} is not numeric: {:?}", name, other),
        }
    }

    pub fn reject_option(&self, name: &str) {
        self.state.lock().rejected_options.insert(name.to_string());
    }

    pub fn fail_command(&self, verb: &str) {
        self.state.lock().failing_commands.insert(verb.to_string());
    }

    pub fn fail_read(&self, name: &str, code: NativeStatus) {
        self.state.lock().failing_reads.insert(name.to_string(), code);
    }

    pub fn fail_initialize(&self, code: NativeStatus) {
        self.state.lock().init_failure = Some(code);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Property writes only, in order.
    pub fn writes(&self) -> Vec<(String, PropertyValue)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::SetProperty(name, value) => Some((name, value)),
                _ => None,
            })
            .collect()
    }

    /// Commands only, in order.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Command(args) => Some(args),
                _ => None,
            })
            .collect()
    }
}

fn run_command(state: &mut FakeState, args: &[&str]) -> Result<(), NativeStatus> {
    let verb = args.first().copied().unwrap_or_default();
    if state.failing_commands.contains(verb) {
        return Err(status::COMMAND);
    }

    match (verb, args.get(1..).unwrap_or(&[])) {
        ("loadfile", [target, ..]) => {
            match state.media.get(*target).copied() {
                Some(duration) => {
                    state.properties.insert("duration".into(), PropertyValue::Double(duration));
                    state.properties.insert("time-pos".into(), PropertyValue::Double(0.0));
                    state.properties.insert("container-fps".into(), PropertyValue::Double(25.0));
                }
                None => {
                    state.properties.remove("duration");
                    state.properties.remove("time-pos");
                    state.properties.remove("container-fps");
                }
            }
            state.properties.insert("pause".into(), PropertyValue::Flag(false));
            Ok(())
        }
        ("seek", [offset, mode, ..]) => {
            let offset: f64 = offset.parse().map_err(|_| status::INVALID_PARAMETER)?;
            let Some(PropertyValue::Double(pos)) = state.properties.get("time-pos").cloned() else {
                return Err(status::COMMAND);
            };
            let duration = match state.properties.get("duration") {
                Some(PropertyValue::Double(d)) => *d,
                _ => f64::MAX,
            };
            let target = match *mode {
                "absolute" => offset,
                "relative" => pos + offset,
                _ => return Err(status::INVALID_PARAMETER),
            };
            state
                .properties
                .insert("time-pos".into(), PropertyValue::Double(target.clamp(0.0, duration)));
            Ok(())
        }
        ("sub-add", [_path, ..]) => {
            let next_id = match state.properties.get("track-list") {
                Some(PropertyValue::Node(Node::Array(items))) => items
                    .iter()
                    .filter(|t| t.get("type").and_then(Node::as_str) == Some("sub"))
                    .count() as i64
                    + 1,
                _ => 1,
            };
            let tracks = state.properties.get_mut("track-list");
            if let Some(PropertyValue::Node(Node::Array(items))) = tracks {
                items.push(Node::Map(vec![
                    ("id".into(), Node::Int64(next_id)),
                    ("type".into(), Node::String("sub".into())),
                    ("external".into(), Node::Flag(true)),
                ]));
            }
            Ok(())
        }
        ("screenshot-to-file", [_path, ..]) => {
            if state.properties.contains_key("time-pos") {
                Ok(())
            } else {
                Err(status::COMMAND)
            }
        }
        ("stop", _) => Ok(()),
        _ => Err(status::COMMAND),
    }
}

impl EngineBackend for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    fn set_option(&mut self, name: &str, value: &str) -> Result<(), NativeStatus> {
        let mut state = self.state.lock();
        state.calls.push(Call::SetOption(name.to_string(), value.to_string()));
        if state.rejected_options.contains(name) {
            return Err(status::OPTION_NOT_FOUND);
        }
        if name == "volume" {
            if let Ok(v) = value.parse::<i64>() {
                state.properties.insert("volume".into(), PropertyValue::Int64(v));
            }
        }
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), NativeStatus> {
        let mut state = self.state.lock();
        state.calls.push(Call::Initialize);
        match state.init_failure {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    fn command(&mut self, args: &[&str]) -> Result<(), NativeStatus> {
        let mut state = self.state.lock();
        state
            .calls
            .push(Call::Command(args.iter().map(|a| a.to_string()).collect()));
        run_command(&mut state, args)
    }

    fn get_property(
        &mut self,
        name: &str,
        format: PropertyFormat,
    ) -> Result<PropertyValue, NativeStatus> {
        let mut state = self.state.lock();
        state.calls.push(Call::GetProperty(name.to_string()));
        if let Some(code) = state.failing_reads.get(name) {
            return Err(*code);
        }
        let value = state
            .properties
            .get(name)
            .cloned()
            .ok_or(status::PROPERTY_UNAVAILABLE)?;

        // Numeric conversions the real engine performs on request
        Ok(match (format, value) {
            (PropertyFormat::Double, PropertyValue::Int64(v)) => PropertyValue::Double(v as f64),
            (PropertyFormat::Int64, PropertyValue::Double(v)) => {
                PropertyValue::Int64(v.round() as i64)
            }
            (_, value) => value,
        })
    }

    fn set_property(&mut self, name: &str, value: &PropertyValue) -> Result<(), NativeStatus> {
        let mut state = self.state.lock();
        state
            .calls
            .push(Call::SetProperty(name.to_string(), value.clone()));
        state.properties.insert(name.to_string(), value.clone());
        Ok(())
    }

    fn error_string(&self, code: NativeStatus) -> String {
        format!("fake engine error {}", code)
    }

    fn destroy(&mut self) {
        self.state.lock().calls.push(Call::Destroy);
    }
}
