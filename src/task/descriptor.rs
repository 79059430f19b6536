use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Characteristic key holding the key of the branch a task works on.
pub const BRANCH: &str = "BRANCH";
/// Characteristic key holding the key of the pull request a task works on.
pub const PULL_REQUEST: &str = "PULL_REQUEST";
/// Characteristic key holding the branch type name (`BRANCH` or `PULL_REQUEST`).
pub const BRANCH_TYPE: &str = "BRANCH_TYPE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskDescriptorError {
    #[error("uuid can't be empty")]
    EmptyUuid,

    #[error("type can't be empty")]
    EmptyType,

    #[error("component uuid can't be empty")]
    EmptyComponentUuid,

    #[error("submitter uuid can't be empty")]
    EmptySubmitterUuid,

    #[error("component and main component must both be set or both be unset")]
    ComponentMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
    uuid: String,
    key: Option<String>,
    name: Option<String>,
}

impl Component {
    pub fn new(
        uuid: impl Into<String>,
        key: Option<String>,
        name: Option<String>,
    ) -> Result<Self, TaskDescriptorError> {
        let uuid = uuid.into();
        if uuid.is_empty() {
            return Err(TaskDescriptorError::EmptyComponentUuid);
        }
        Ok(Self { uuid, key, name })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    uuid: String,
    login: Option<String>,
}

impl User {
    pub fn new(uuid: impl Into<String>, login: Option<String>) -> Result<Self, TaskDescriptorError> {
        let uuid = uuid.into();
        if uuid.is_empty() {
            return Err(TaskDescriptorError::EmptySubmitterUuid);
        }
        Ok(Self { uuid, login })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn login(&self) -> Option<&str> {
        self.login.as_deref()
    }
}

/// Immutable description of one submitted unit of background work.
///
/// Built once with [`TaskDescriptor::builder`], handed to a processor and
/// dropped. The outcome of the task lives in the activity store, never here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDescriptor {
    #[serde(rename = "type")]
    task_type: String,
    uuid: String,
    component: Option<Component>,
    main_component: Option<Component>,
    submitter: Option<User>,
    characteristics: BTreeMap<String, String>,
}

impl TaskDescriptor {
    pub fn builder() -> TaskDescriptorBuilder {
        TaskDescriptorBuilder::default()
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn component(&self) -> Option<&Component> {
        self.component.as_ref()
    }

    pub fn main_component(&self) -> Option<&Component> {
        self.main_component.as_ref()
    }

    pub fn submitter(&self) -> Option<&User> {
        self.submitter.as_ref()
    }

    pub fn characteristics(&self) -> &BTreeMap<String, String> {
        &self.characteristics
    }

    pub fn characteristic(&self, key: &str) -> Option<&str> {
        self.characteristics.get(key).map(String::as_str)
    }
}

impl fmt::Display for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task[type={}, uuid={}", self.task_type, self.uuid)?;
        if let Some(component) = &self.component {
            write!(f, ", component={}", component.uuid)?;
        }
        if let Some(submitter) = &self.submitter {
            write!(f, ", submitter={}", submitter.uuid)?;
        }
        write!(f, "]")
    }
}

#[derive(Debug, Default)]
pub struct TaskDescriptorBuilder {
    task_type: Option<String>,
    uuid: Option<String>,
    component: Option<Component>,
    main_component: Option<Component>,
    submitter: Option<User>,
    characteristics: BTreeMap<String, String>,
}

impl TaskDescriptorBuilder {
    pub fn task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn component(mut self, component: Option<Component>) -> Self {
        self.component = component;
        self
    }

    pub fn main_component(mut self, main_component: Option<Component>) -> Self {
        self.main_component = main_component;
        self
    }

    pub fn submitter(mut self, submitter: Option<User>) -> Self {
        self.submitter = submitter;
        self
    }

    pub fn characteristics(mut self, characteristics: BTreeMap<String, String>) -> Self {
        self.characteristics = characteristics;
        self
    }

    pub fn build(self) -> Result<TaskDescriptor, TaskDescriptorError> {
        let uuid = self.uuid.filter(|u| !u.is_empty()).ok_or(TaskDescriptorError::EmptyUuid)?;
        let task_type = self
            .task_type
            .filter(|t| !t.is_empty())
            .ok_or(TaskDescriptorError::EmptyType)?;
        if self.component.is_some() != self.main_component.is_some() {
            return Err(TaskDescriptorError::ComponentMismatch);
        }

        Ok(TaskDescriptor {
            task_type,
            uuid,
            component: self.component,
            main_component: self.main_component,
            submitter: self.submitter,
            characteristics: self.characteristics,
        })
    }
}
