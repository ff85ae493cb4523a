// To-do list model
//
// The events below are the only way the list changes. Every event
// clones the map it is given and returns the edited copy.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use journal_kernel::{BoxError, Event, Registry};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Todo {
    pub title: String,
    pub done: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Todos {
    pub items: BTreeMap<Uuid, Todo>,
}

impl Todos {
    fn require(&self, id: &Uuid) -> Result<&Todo, BoxError> {
        self.items
            .get(id)
            .ok_or_else(|| format!("no to-do with id {id}").into())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TodoAdded {
    pub id: Uuid,
    pub title: String,
}

impl Event<Todos> for TodoAdded {
    fn name(&self) -> &str {
        "todo-added"
    }

    fn validate(&self, model: &Todos) -> Result<(), BoxError> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".into());
        }
        if model.items.contains_key(&self.id) {
            return Err(format!("id {} is already taken", self.id).into());
        }
        Ok(())
    }

    fn execute(&self, model: &Todos, time: DateTime<Utc>) -> Todos {
        let mut next = model.clone();
        next.items.insert(
            self.id,
            Todo {
                title: self.title.trim().to_string(),
                done: false,
                created_at: time,
                completed_at: None,
            },
        );
        next
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TodoCompleted {
    pub id: Uuid,
}

impl Event<Todos> for TodoCompleted {
    fn name(&self) -> &str {
        "todo-completed"
    }

    fn validate(&self, model: &Todos) -> Result<(), BoxError> {
        if model.require(&self.id)?.done {
            return Err(format!("to-do {} is already done", self.id).into());
        }
        Ok(())
    }

    fn execute(&self, model: &Todos, time: DateTime<Utc>) -> Todos {
        let mut next = model.clone();
        if let Some(todo) = next.items.get_mut(&self.id) {
            todo.done = true;
            todo.completed_at = Some(time);
        }
        next
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TodoRemoved {
    pub id: Uuid,
}

impl Event<Todos> for TodoRemoved {
    fn name(&self) -> &str {
        "todo-removed"
    }

    fn validate(&self, model: &Todos) -> Result<(), BoxError> {
        model.require(&self.id).map(|_| ())
    }

    fn execute(&self, model: &Todos, _time: DateTime<Utc>) -> Todos {
        let mut next = model.clone();
        next.items.remove(&self.id);
        next
    }
}

pub fn registry() -> Registry<Todos> {
    let mut registry = Registry::new();
    registry
        .register::<TodoAdded>("todo-added")
        .register::<TodoCompleted>("todo-completed")
        .register::<TodoRemoved>("todo-removed");
    registry
}
