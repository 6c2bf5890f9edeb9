//! Simulated output sinks and filter elements

use crate::framework::lock;
use crate::pipeline::SimPipeline;
use exaile_core::media::{
    AudioSinkElement, ClockTime, DeviceNotifyHandler, FilterElement, State, StateChangeReturn,
};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

pub(crate) struct SimSinkShared {
    pub(crate) name: String,
    factory: String,
    state: Mutex<State>,
    parent: Mutex<Weak<SimPipeline>>,
    device: Mutex<Option<String>>,
    current_device: Mutex<Option<String>>,
    device_notify: Mutex<Option<Arc<DeviceNotifyHandler>>>,
    error_message: Option<String>,
    error_posted: AtomicBool,
}

impl SimSinkShared {
    pub(crate) fn new(name: &str, factory: &str) -> Self {
        Self {
            name: name.to_string(),
            factory: factory.to_string(),
            state: Mutex::new(State::Null),
            parent: Mutex::new(Weak::new()),
            device: Mutex::new(None),
            current_device: Mutex::new(None),
            device_notify: Mutex::new(None),
            error_message: None,
            error_posted: AtomicBool::new(false),
        }
    }

    pub(crate) fn with_error(mut self, message: &str) -> Self {
        self.error_message = Some(message.to_string());
        self
    }

    fn has_device_property(&self) -> bool {
        matches!(self.factory.as_str(), "pulsesink" | "alsasink" | "jackaudiosink")
    }

    pub(crate) fn set_parent(&self, parent: Weak<SimPipeline>) {
        *lock(&self.parent) = parent;
    }

    pub(crate) fn parent(&self) -> Option<Arc<SimPipeline>> {
        lock(&self.parent).upgrade()
    }

    pub(crate) fn set_state(&self, state: State) {
        *lock(&self.state) = state;
    }

    pub(crate) fn state(&self) -> State {
        *lock(&self.state)
    }

    /// Error to post once data flows, taken at most once
    pub(crate) fn take_pending_error(&self) -> Option<String> {
        let message = self.error_message.as_ref()?;
        if self.state() == State::Playing && !self.error_posted.swap(true, Ordering::SeqCst) {
            Some(message.clone())
        } else {
            None
        }
    }

    pub(crate) fn change_current_device(&self, device: Option<String>) {
        *lock(&self.current_device) = device.clone();
        let handler = lock(&self.device_notify).clone();
        if let Some(handler) = handler {
            handler(device);
        }
    }
}

/// Output sink handed out by the simulated framework
pub struct SimSink {
    shared: Arc<SimSinkShared>,
}

impl SimSink {
    pub(crate) fn from_shared(shared: Arc<SimSinkShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<SimSinkShared> {
        &self.shared
    }

    /// Whether this is an error sink
    pub fn is_error_sink(&self) -> bool {
        self.shared.error_message.is_some()
    }
}

impl AudioSinkElement for SimSink {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn factory_name(&self) -> &str {
        &self.shared.factory
    }

    fn set_state(&self, state: State) -> StateChangeReturn {
        self.shared.set_state(state);
        StateChangeReturn::Success
    }

    fn state(&self, _timeout: Duration) -> State {
        self.shared.state()
    }

    fn sync_state_with_parent(&self) -> bool {
        match self.shared.parent() {
            Some(parent) => {
                self.shared.set_state(parent.state());
                true
            }
            None => false,
        }
    }

    fn query_position(&self) -> Option<ClockTime> {
        if self.shared.state() < State::Paused {
            return None;
        }
        self.shared.parent()?.query_position_internal()
    }

    fn set_device(&self, device: &str) -> bool {
        if !self.shared.has_device_property() {
            return false;
        }
        *lock(&self.shared.device) = Some(device.to_string());
        *lock(&self.shared.current_device) = Some(device.to_string());
        true
    }

    fn device(&self) -> Option<String> {
        lock(&self.shared.device).clone()
    }

    fn has_current_device(&self) -> bool {
        self.shared.factory == "pulsesink"
    }

    fn current_device(&self) -> Option<String> {
        lock(&self.shared.current_device).clone()
    }

    fn connect_current_device_notify(&self, handler: DeviceNotifyHandler) {
        *lock(&self.shared.device_notify) = Some(Arc::new(handler));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Filter element handed out by the simulated framework
#[derive(Debug)]
pub struct SimFilter {
    name: String,
    factory: String,
}

impl SimFilter {
    pub(crate) fn new(name: &str, factory: &str) -> Self {
        Self {
            name: name.to_string(),
            factory: factory.to_string(),
        }
    }
}

impl FilterElement for SimFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn factory_name(&self) -> &str {
        &self.factory
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
