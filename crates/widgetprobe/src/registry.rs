//! Proxy Class Registry
//!
//! Test authors describe the remote widgets they care about as proxy
//! classes. Every class belongs to a lineage rooted at an *emulator base*,
//! and each lineage carries an [`Identity`]. The [`Registry`] records classes
//! per identity, resolves which class represents a given remote object, and
//! mixes protocol capabilities (such as Qt signal access) into every class
//! resolved under an identity.
//!
//! ```
//! use widgetprobe::registry::{ClassSpec, Registry};
//!
//! let registry = Registry::new();
//! let base = registry.make_default_emulator_base();
//! let button = registry.define(ClassSpec::new("QPushButton").extends(&base));
//! assert_eq!(button.identity(), base.identity());
//! ```

// Allow expect for RwLock - lock poisoning is truly exceptional
#![allow(clippy::expect_used)]

use crate::backend::StateMap;
use crate::query::get_classname_from_path;
use crate::result::{ProbeError, ProbeResult};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Class names that never receive an identity of their own
pub const FRAMEWORK_ROOTS: &[&str] = &[
    "ProxyObjectBase",
    "IntrospectionObject",
    "CustomProxyBase",
    "ApplicationProxy",
];

/// Class name of the emulator base created when the caller supplies none
pub const DEFAULT_EMULATOR_BASE: &str = "DefaultEmulatorBase";

// =============================================================================
// IDENTITY & CAPABILITIES
// =============================================================================

/// Opaque key shared by every class in one emulator-base lineage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(Uuid);

impl Identity {
    /// Mint a fresh identity
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extra behavior a proxy class can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// Application root: owning process and pid
    Application,
    /// Qt objects: signals, slots and signal watching
    Qt,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application => write!(f, "application"),
            Self::Qt => write!(f, "Qt"),
        }
    }
}

/// Custom validation hook deciding whether a class represents `(path, state)`
pub type Validator = Arc<dyn Fn(&[u8], &StateMap) -> bool + Send + Sync>;

// =============================================================================
// PROXY CLASS
// =============================================================================

/// Descriptor of one proxy class.
///
/// Bases are ordered and can be rewritten when extensions are merged in;
/// the method resolution order is the deduplicated depth-first walk of them.
pub struct ProxyClass {
    name: String,
    type_query_name: Option<String>,
    identity: Option<Identity>,
    bases: RwLock<Vec<Arc<ProxyClass>>>,
    validator: Option<Validator>,
    capabilities: BTreeSet<Capability>,
    generated: bool,
}

impl ProxyClass {
    fn root(name: &str, bases: Vec<Arc<ProxyClass>>, capabilities: &[Capability]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            type_query_name: None,
            identity: None,
            bases: RwLock::new(bases),
            validator: None,
            capabilities: capabilities.iter().copied().collect(),
            generated: false,
        })
    }

    /// Class name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node name used when this class is the target of a selection
    #[must_use]
    pub fn type_query_name(&self) -> &str {
        self.type_query_name.as_deref().unwrap_or(&self.name)
    }

    /// Identity of the lineage, absent on framework roots and mixins
    #[must_use]
    pub const fn identity(&self) -> Option<Identity> {
        self.identity
    }

    /// Whether the class was synthesized during resolution
    #[must_use]
    pub const fn is_generated(&self) -> bool {
        self.generated
    }

    /// Current direct bases
    #[must_use]
    pub fn bases(&self) -> Vec<Arc<ProxyClass>> {
        self.bases.read().expect("lock poisoned").clone()
    }

    fn set_bases(&self, bases: Vec<Arc<ProxyClass>>) {
        *self.bases.write().expect("lock poisoned") = bases;
    }

    /// Append `base` unless it is already a direct base
    pub(crate) fn push_base(&self, base: &Arc<ProxyClass>) {
        let mut bases = self.bases.write().expect("lock poisoned");
        if !contains(&bases, base) {
            bases.push(Arc::clone(base));
        }
    }

    /// Whether this class represents the remote object at `path`.
    ///
    /// Without a custom validator the type name taken from the path must
    /// equal the class name byte for byte.
    #[must_use]
    pub fn validate(&self, path: &[u8], state: &StateMap) -> bool {
        match &self.validator {
            Some(validator) => validator(path, state),
            None => get_classname_from_path(path).as_bytes() == self.name.as_bytes(),
        }
    }

    /// Method resolution order, starting with this class
    #[must_use]
    pub fn mro(self: &Arc<Self>) -> Vec<Arc<ProxyClass>> {
        let mut order = Vec::new();
        collect_mro(self, &mut order);
        order
    }

    /// Whether this class or any ancestor carries `capability`
    #[must_use]
    pub fn has_capability(self: &Arc<Self>, capability: Capability) -> bool {
        self.mro()
            .iter()
            .any(|class| class.capabilities.contains(&capability))
    }

    /// Whether `other` appears in this class's resolution order
    #[must_use]
    pub fn is_subclass_of(self: &Arc<Self>, other: &Arc<ProxyClass>) -> bool {
        self.mro().iter().any(|class| Arc::ptr_eq(class, other))
    }

    /// Topmost identified class of this lineage
    #[must_use]
    pub fn identity_root(self: &Arc<Self>) -> Arc<ProxyClass> {
        self.mro()
            .into_iter()
            .filter(|class| class.identity.is_some())
            .last()
            .unwrap_or_else(|| Arc::clone(self))
    }
}

fn collect_mro(class: &Arc<ProxyClass>, order: &mut Vec<Arc<ProxyClass>>) {
    if order.iter().any(|seen| Arc::ptr_eq(seen, class)) {
        return;
    }
    order.push(Arc::clone(class));
    for base in class.bases() {
        collect_mro(&base, order);
    }
}

fn contains(classes: &[Arc<ProxyClass>], class: &Arc<ProxyClass>) -> bool {
    classes.iter().any(|c| Arc::ptr_eq(c, class))
}

impl fmt::Debug for ProxyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bases: Vec<String> = self.bases().iter().map(|b| b.name.clone()).collect();
        f.debug_struct("ProxyClass")
            .field("name", &self.name)
            .field("identity", &self.identity)
            .field("bases", &bases)
            .field("capabilities", &self.capabilities)
            .field("generated", &self.generated)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ProxyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// =============================================================================
// CLASS SPECS
// =============================================================================

/// Typed custom proxy class, usually derived with `#[derive(CustomProxy)]`
pub trait CustomProxy: 'static {
    /// Name of the class, matched against remote type names
    fn class_name() -> &'static str;

    /// Node name to select when querying for this class
    fn type_query_name() -> Option<&'static str> {
        None
    }

    /// Whether this class represents the remote object at `path`
    fn validate(path: &[u8], _state: &StateMap) -> bool {
        get_classname_from_path(path) == Self::class_name()
    }
}

/// Builder describing a class to [`Registry::define`]
#[derive(Clone)]
pub struct ClassSpec {
    name: String,
    type_query_name: Option<String>,
    bases: Vec<Arc<ProxyClass>>,
    validator: Option<Validator>,
    capabilities: BTreeSet<Capability>,
    identity: Option<Identity>,
    generated: bool,
}

impl ClassSpec {
    /// Describe a class called `name`
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_query_name: None,
            bases: Vec::new(),
            validator: None,
            capabilities: BTreeSet::new(),
            identity: None,
            generated: false,
        }
    }

    /// Describe the class of a [`CustomProxy`] type
    #[must_use]
    pub fn of<T: CustomProxy>() -> Self {
        let mut spec = Self::new(T::class_name()).validate_with(T::validate);
        spec.type_query_name = T::type_query_name().map(str::to_string);
        spec
    }

    /// Append a base class
    #[must_use]
    pub fn extends(mut self, base: &Arc<ProxyClass>) -> Self {
        self.bases.push(Arc::clone(base));
        self
    }

    /// Replace the default name-based validation
    #[must_use]
    pub fn validate_with<F>(mut self, validator: F) -> Self
    where
        F: Fn(&[u8], &StateMap) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Select this class by a node name other than its class name
    #[must_use]
    pub fn type_query_name(mut self, name: impl Into<String>) -> Self {
        self.type_query_name = Some(name.into());
        self
    }

    /// Grant a capability
    #[must_use]
    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    fn generated(mut self, identity: Identity) -> Self {
        self.generated = true;
        self.identity = Some(identity);
        self
    }
}

impl fmt::Debug for ClassSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassSpec")
            .field("name", &self.name)
            .field("type_query_name", &self.type_query_name)
            .field("bases", &self.bases.iter().map(|b| b.name()).collect::<Vec<_>>())
            .field("custom_validator", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

/// Anything that names a node type in a selection
pub trait TypeSelector {
    /// Node name to put in the query
    fn query_name(&self) -> String;
}

impl TypeSelector for &str {
    fn query_name(&self) -> String {
        (*self).to_string()
    }
}

impl TypeSelector for String {
    fn query_name(&self) -> String {
        self.clone()
    }
}

impl TypeSelector for &String {
    fn query_name(&self) -> String {
        (*self).clone()
    }
}

impl TypeSelector for Arc<ProxyClass> {
    fn query_name(&self) -> String {
        self.type_query_name().to_string()
    }
}

impl TypeSelector for &Arc<ProxyClass> {
    fn query_name(&self) -> String {
        self.type_query_name().to_string()
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Classes per identity, keyed by class name
pub type ClassTable = HashMap<Identity, BTreeMap<String, Arc<ProxyClass>>>;

/// Identity-keyed table of proxy classes and their extension mixins
pub struct Registry {
    classes: RwLock<ClassTable>,
    extensions: RwLock<HashMap<Identity, Vec<Arc<ProxyClass>>>>,
    proxy_object_base: Arc<ProxyClass>,
    introspection_object: Arc<ProxyClass>,
    custom_proxy_base: Arc<ProxyClass>,
    application_proxy: Arc<ProxyClass>,
    qt_object_proxy: Arc<ProxyClass>,
}

impl Registry {
    /// Create an empty registry with the framework classes in place
    #[must_use]
    pub fn new() -> Self {
        let proxy_object_base = ProxyClass::root("ProxyObjectBase", Vec::new(), &[]);
        let introspection_object = ProxyClass::root(
            "IntrospectionObject",
            vec![Arc::clone(&proxy_object_base)],
            &[],
        );
        let custom_proxy_base = ProxyClass::root(
            "CustomProxyBase",
            vec![Arc::clone(&introspection_object)],
            &[],
        );
        let application_proxy = ProxyClass::root(
            "ApplicationProxy",
            vec![Arc::clone(&introspection_object)],
            &[Capability::Application],
        );
        let qt_object_proxy = ProxyClass::root("QtObjectProxy", Vec::new(), &[Capability::Qt]);
        Self {
            classes: RwLock::new(HashMap::new()),
            extensions: RwLock::new(HashMap::new()),
            proxy_object_base,
            introspection_object,
            custom_proxy_base,
            application_proxy,
            qt_object_proxy,
        }
    }

    /// Root of every proxy class
    #[must_use]
    pub fn introspection_object(&self) -> &Arc<ProxyClass> {
        &self.introspection_object
    }

    /// Base for hand-written emulator bases
    #[must_use]
    pub fn custom_proxy_base(&self) -> &Arc<ProxyClass> {
        &self.custom_proxy_base
    }

    /// Mixin for application root objects
    #[must_use]
    pub fn application_proxy(&self) -> &Arc<ProxyClass> {
        &self.application_proxy
    }

    /// Mixin for objects served by the Qt extension interface
    #[must_use]
    pub fn qt_object_proxy(&self) -> &Arc<ProxyClass> {
        &self.qt_object_proxy
    }

    /// Define a class.
    ///
    /// The identity is inherited from the first identified base; otherwise a
    /// new one is minted unless the name is a framework root. Extensions
    /// registered for the identity are appended to the bases, and
    /// non-generated identified classes are recorded by name.
    pub fn define(&self, spec: ClassSpec) -> Arc<ProxyClass> {
        let ClassSpec {
            name,
            type_query_name,
            mut bases,
            validator,
            capabilities,
            identity,
            generated,
        } = spec;

        if bases.is_empty() && !generated {
            bases.push(Arc::clone(&self.custom_proxy_base));
        }
        let identity = identity
            .or_else(|| bases.iter().find_map(|base| base.identity()))
            .or_else(|| (!FRAMEWORK_ROOTS.contains(&name.as_str())).then(Identity::new));

        if let Some(identity) = identity {
            for extension in self.extensions_for(identity) {
                if !contains(&bases, &extension) {
                    bases.push(extension);
                }
            }
        }

        let class = Arc::new(ProxyClass {
            name,
            type_query_name,
            identity,
            bases: RwLock::new(bases),
            validator,
            capabilities,
            generated,
        });

        if let (Some(identity), false) = (identity, generated) {
            self.classes
                .write()
                .expect("lock poisoned")
                .entry(identity)
                .or_default()
                .insert(class.name.clone(), Arc::clone(&class));
        }
        class
    }

    /// Define the class of a [`CustomProxy`] type below `base`
    pub fn define_custom<T: CustomProxy>(&self, base: &Arc<ProxyClass>) -> Arc<ProxyClass> {
        self.define(ClassSpec::of::<T>().extends(base))
    }

    /// Create a fresh `DefaultEmulatorBase` lineage
    pub fn make_default_emulator_base(&self) -> Arc<ProxyClass> {
        self.define(ClassSpec::new(DEFAULT_EMULATOR_BASE).extends(&self.custom_proxy_base))
    }

    /// Ensure `class` is the topmost identified class of its lineage.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::WrongBaseClass`] naming the real base otherwise
    pub fn check_emulator_base(&self, class: &Arc<ProxyClass>) -> ProbeResult<()> {
        let actual = class.identity_root();
        if Arc::ptr_eq(&actual, class) {
            Ok(())
        } else {
            Err(ProbeError::WrongBaseClass {
                passed: class.name().to_string(),
                actual: actual.name().to_string(),
            })
        }
    }

    /// Mix `extensions` into every class resolved under `base`'s identity.
    ///
    /// The stored tuple is `base` followed by `extensions`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::InvalidArgument`] if `base` has no identity
    pub fn register_extension_classes_for_proxy_base(
        &self,
        base: &Arc<ProxyClass>,
        extensions: Vec<Arc<ProxyClass>>,
    ) -> ProbeResult<()> {
        let identity = base.identity().ok_or_else(|| {
            ProbeError::invalid_argument(format!("{} is not an emulator base", base.name()))
        })?;
        let mut stored = Vec::with_capacity(extensions.len() + 1);
        stored.push(Arc::clone(base));
        stored.extend(extensions);
        self.extensions
            .write()
            .expect("lock poisoned")
            .insert(identity, stored);
        Ok(())
    }

    /// Extensions registered for an identity
    #[must_use]
    pub fn extensions_for(&self, identity: Identity) -> Vec<Arc<ProxyClass>> {
        self.extensions
            .read()
            .expect("lock poisoned")
            .get(&identity)
            .cloned()
            .unwrap_or_default()
    }

    /// Classes registered under an identity, by name
    #[must_use]
    pub fn classes_for(&self, identity: Identity) -> Vec<Arc<ProxyClass>> {
        self.classes
            .read()
            .expect("lock poisoned")
            .get(&identity)
            .map(|classes| classes.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Resolve the class representing the remote object at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::AmbiguousProxyClass`] when more than one
    /// registered class validates
    pub fn get_proxy_object_class(
        &self,
        identity: Identity,
        path: &[u8],
        state: &StateMap,
    ) -> ProbeResult<Arc<ProxyClass>> {
        let mut candidates: Vec<Arc<ProxyClass>> = self
            .classes_for(identity)
            .into_iter()
            .filter(|class| class.validate(path, state))
            .collect();

        match candidates.len() {
            0 => Ok(self.default_proxy_class(identity, path)),
            1 => {
                let class = candidates.remove(0);
                self.combine_base_and_extensions(&class, &self.extensions_for(identity));
                Ok(class)
            }
            _ => Err(ProbeError::AmbiguousProxyClass {
                candidates: candidates.iter().map(|c| c.name().to_string()).collect(),
                path: String::from_utf8_lossy(path).into_owned(),
            }),
        }
    }

    /// Rewrite `class`'s bases to include `extensions`.
    ///
    /// The new list holds the current bases and the extensions once each,
    /// without `class` itself, ordered by `2 * mro_len + (1 if extension)`
    /// descending. Equal keys keep their relative order.
    pub fn combine_base_and_extensions(
        &self,
        class: &Arc<ProxyClass>,
        extensions: &[Arc<ProxyClass>],
    ) {
        let mut combined: Vec<Arc<ProxyClass>> = Vec::new();
        for candidate in class.bases().into_iter().chain(extensions.iter().cloned()) {
            if !Arc::ptr_eq(&candidate, class) && !contains(&combined, &candidate) {
                combined.push(candidate);
            }
        }
        let mut keyed: Vec<(usize, Arc<ProxyClass>)> = combined
            .into_iter()
            .map(|base| {
                let key = 2 * base.mro().len() + usize::from(contains(extensions, &base));
                (key, base)
            })
            .collect();
        keyed.sort_by_key(|(key, _)| std::cmp::Reverse(*key));
        class.set_bases(keyed.into_iter().map(|(_, base)| base).collect());
    }

    fn default_proxy_class(&self, identity: Identity, path: &[u8]) -> Arc<ProxyClass> {
        let name = get_classname_from_path(path);
        tracing::debug!(
            "Generating introspection instance for type '{}' based on generic class.",
            name
        );
        let mut spec = ClassSpec::new(name).generated(identity);
        let extensions = self.extensions_for(identity);
        if extensions.is_empty() {
            spec = spec.extends(&self.introspection_object);
        }
        // define() appends the identity's extensions.
        self.define(spec)
    }

    /// Copy of the class table
    #[must_use]
    pub fn snapshot(&self) -> ClassTable {
        self.classes.read().expect("lock poisoned").clone()
    }

    /// Swap in `table` until the returned guard drops
    #[must_use]
    pub fn patch_registry(&self, table: ClassTable) -> RegistryPatch<'_> {
        let previous = std::mem::replace(&mut *self.classes.write().expect("lock poisoned"), table);
        RegistryPatch {
            registry: self,
            previous: Some(previous),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let classes = self.classes.read().expect("lock poisoned");
        let counts: BTreeMap<String, usize> = classes
            .iter()
            .map(|(identity, table)| (identity.to_string(), table.len()))
            .collect();
        f.debug_struct("Registry")
            .field("classes", &counts)
            .field("base", &self.proxy_object_base.name())
            .finish_non_exhaustive()
    }
}

/// Guard returned by [`Registry::patch_registry`]; restores the previous table on drop
#[derive(Debug)]
pub struct RegistryPatch<'a> {
    registry: &'a Registry,
    previous: Option<ClassTable>,
}

impl Drop for RegistryPatch<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.registry.classes.write().expect("lock poisoned") = previous;
        }
    }
}
