//! Models, their event handlers, and the registry used to find them.
//!
//! A model is any type that reacts to events. It declares which payload types
//! it handles through a [`HandlerTable`]; the scheduler looks the table up by
//! the payload's `TypeId` at dispatch time. Payloads nobody handles are
//! reported as diagnostics, never dropped silently.

use crate::error::SimError;
use crate::ns_bridge::NsInterface;
use crate::radio::Radio;
use crate::scheduler::ModelContext;
use crate::sensor::FlowerSensor;
use std::any::{type_name, Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::rc::Rc;
use swarm_env::{ModelId, ObjectId};

/// Upcast to `Any` so the scheduler can hand a model back to its concrete
/// handlers.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// An event-driven participant in the simulation.
///
/// Handlers run one at a time on the scheduler thread, with the clock set to
/// the event's timestamp. Anything a handler wants to happen later goes
/// through the [`ModelContext`] it receives.
pub trait Model: AsAny + 'static {
    /// Payload types this model reacts to.
    fn handlers() -> HandlerTable<Self>
    where
        Self: Sized,
    {
        HandlerTable::new()
    }

    /// Called once before the first event is dispatched. Timers created here
    /// fire relative to the start time.
    fn initialize(&mut self, ctx: &mut ModelContext<'_>) -> Result<(), SimError> {
        let _ = ctx;
        Ok(())
    }

    /// Called once when the run ends.
    fn finish(&mut self, ctx: &mut ModelContext<'_>) {
        let _ = ctx;
    }
}

/// Type-erased handler stored per payload type.
pub(crate) type ErasedHandler = Rc<dyn Fn(&mut dyn Model, &mut ModelContext<'_>, &dyn Any) -> Result<(), SimError>>;

/// Typed handler signature for payload `E` on model `M`.
pub type Handler<M, E> = fn(&mut M, &mut ModelContext<'_>, &E) -> Result<(), SimError>;

/// Payload-type to handler mapping for one model type.
///
/// ```ignore
/// impl Model for Bee {
///     fn handlers() -> HandlerTable<Self> {
///         HandlerTable::new()
///             .on::<ReceptionEvent>(Bee::on_reception)
///             .on::<MessageReceived>(Bee::on_message)
///     }
/// }
/// ```
pub struct HandlerTable<M> {
    entries: HashMap<TypeId, ErasedHandler>,
    names: Vec<&'static str>,
    _model: PhantomData<fn(&mut M)>,
}

impl<M: Model> HandlerTable<M> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            names: Vec::new(),
            _model: PhantomData,
        }
    }

    /// Registers `handler` for payloads of type `E`. A later registration for
    /// the same type replaces the earlier one.
    pub fn on<E: Any>(mut self, handler: Handler<M, E>) -> Self {
        let erased: ErasedHandler = Rc::new(
            move |model: &mut dyn Model, ctx: &mut ModelContext<'_>, payload: &dyn Any| {
                let owner = ctx.model_id();
                let model = model
                    .as_any_mut()
                    .downcast_mut::<M>()
                    .ok_or(SimError::TypeMismatch {
                        model: owner,
                        expected: type_name::<M>(),
                    })?;
                let event = payload.downcast_ref::<E>().ok_or(SimError::TypeMismatch {
                    model: owner,
                    expected: type_name::<E>(),
                })?;
                handler(model, ctx, event)
            },
        );
        if self.entries.insert(TypeId::of::<E>(), erased).is_none() {
            self.names.push(type_name::<E>());
        }
        self
    }

    /// Returns true if payloads of type `E` have a handler.
    pub fn handles<E: Any>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<E>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of the handled payload types, in registration order.
    pub fn payload_names(&self) -> &[&'static str] {
        &self.names
    }

    pub(crate) fn into_erased(self) -> HashMap<TypeId, ErasedHandler> {
        self.entries
    }
}

impl<M: Model> Default for HandlerTable<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Optional wiring for a model being added to the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelOptions {
    /// Display name (defaults to the type name plus id)
    pub name: Option<String>,

    /// Containing model, if any
    pub parent: Option<ModelId>,

    /// Physical body this model is embodied in
    pub object: Option<ObjectId>,
}

impl ModelOptions {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn child_of(mut self, parent: ModelId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn embodied_as(mut self, object: ObjectId) -> Self {
        self.object = Some(object);
        self
    }
}

/// Registry metadata for one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: ModelId,
    pub name: String,
    pub parent: Option<ModelId>,
    pub object: Option<ObjectId>,

    /// Concrete type name, for diagnostics
    pub type_name: &'static str,

    type_id: TypeId,
}

impl ModelInfo {
    /// Returns true if the model's concrete type is `M`.
    pub fn is<M: Model>(&self) -> bool {
        self.type_id == TypeId::of::<M>()
    }
}

/// Lookup of models by id and by concrete type.
///
/// Holds metadata only, so handlers can query it while another model is
/// being dispatched.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: BTreeMap<ModelId, ModelInfo>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert<M: Model>(&mut self, id: ModelId, options: ModelOptions) -> &ModelInfo {
        let type_name = type_name::<M>();
        let name = options.name.unwrap_or_else(|| {
            let short = type_name.rsplit("::").next().unwrap_or(type_name);
            format!("{short}-{}", id.0)
        });
        self.models.entry(id).or_insert(ModelInfo {
            id,
            name,
            parent: options.parent,
            object: options.object,
            type_name,
            type_id: TypeId::of::<M>(),
        })
    }

    pub(crate) fn remove(&mut self, id: ModelId) -> Option<ModelInfo> {
        self.models.remove(&id)
    }

    pub fn find_model_by_id(&self, id: ModelId) -> Option<&ModelInfo> {
        self.models.get(&id)
    }

    /// First model of type `M`, in id order.
    pub fn find_model_by_type<M: Model>(&self) -> Option<&ModelInfo> {
        self.models.values().find(|info| info.is::<M>())
    }

    /// Every model of type `M`, in id order.
    pub fn find_models_by_type<M: Model>(&self) -> Vec<&ModelInfo> {
        self.models.values().filter(|info| info.is::<M>()).collect()
    }

    pub fn find_model_by_name(&self, name: &str) -> Option<&ModelInfo> {
        self.models.values().find(|info| info.name == name)
    }

    /// Direct children of `parent`, in id order.
    pub fn children_of(&self, parent: ModelId) -> Vec<&ModelInfo> {
        self.models
            .values()
            .filter(|info| info.parent == Some(parent))
            .collect()
    }

    /// Models bound to a physical body, with their object ids.
    pub fn embodied(&self) -> impl Iterator<Item = (ModelId, ObjectId)> + '_ {
        self.models
            .values()
            .filter_map(|info| info.object.map(|object| (info.id, object)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelInfo> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Capabilities an embodied model may expose to harness code.
///
/// Every accessor is optional: a model without a radio simply returns `None`.
pub trait Platform {
    fn radio(&self) -> Option<&Radio> {
        None
    }

    fn ns(&self) -> Option<&NsInterface> {
        None
    }

    fn sensor(&self, name: &str) -> Option<&FlowerSensor> {
        let _ = name;
        None
    }

    fn sensor_names(&self) -> Vec<&str> {
        Vec::new()
    }
}
