use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::debug;

use jitlink::boundary::{raw, RawIValue, IVALUE_TENSOR, IVALUE_TUPLE};
use jitlink::engine::{MethodArgument, ModuleContext, NativeEngine, NativeError, TensorContext};
use jitlink::DType;

use crate::script::{self, Expr, Param, ScriptMethod, ScriptModule, ScriptType};
use crate::tensor::{RefTensor, Storage};

const MODULE_FORMAT: &str = "jitlink-ref.v1";

/// In-process engine evaluating the reference script language.
///
/// Tensors and modules are heap objects whose addresses serve as contexts. Live counts
/// are tracked per engine so leaks and double releases show up in tests.
#[derive(Debug, Default)]
pub struct RefEngine {
    live_tensors: AtomicUsize,
    live_modules: AtomicUsize,
}

impl RefEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tensor contexts handed out and not yet released.
    pub fn live_tensors(&self) -> usize {
        self.live_tensors.load(Ordering::SeqCst)
    }

    pub fn live_modules(&self) -> usize {
        self.live_modules.load(Ordering::SeqCst)
    }

    fn adopt_tensor(&self, tensor: RefTensor) -> TensorContext {
        self.live_tensors.fetch_add(1, Ordering::SeqCst);
        TensorContext::new(NonNull::from(Box::leak(Box::new(tensor))).cast())
    }

    fn adopt_module(&self, module: ScriptModule) -> ModuleContext {
        self.live_modules.fetch_add(1, Ordering::SeqCst);
        ModuleContext::new(NonNull::from(Box::leak(Box::new(module))).cast())
    }

    /// Converts a finished evaluation into a caller-owned boundary tree.
    fn export(&self, value: &Slot) -> Result<RawIValue, NativeError> {
        match value {
            Slot::Tensor(tensor) => Ok(RawIValue::tensor(self.adopt_tensor(tensor.to_owned_copy()))),
            Slot::Tuple(items) => {
                let mut children = Vec::with_capacity(items.len());
                for item in items {
                    match self.export(item) {
                        Ok(child) => children.push(child),
                        Err(err) => {
                            self.discard(children);
                            return Err(err);
                        }
                    }
                }
                match raw::alloc_tuple(&children) {
                    Ok(node) => Ok(node),
                    Err(err) => {
                        self.discard(children);
                        Err(NativeError::new(err.to_string()))
                    }
                }
            }
        }
    }

    fn discard(&self, nodes: Vec<RawIValue>) {
        for node in nodes {
            // SAFETY: every node was produced by `export` and is owned here.
            unsafe { raw::free_tree(self, node) };
        }
    }
}

unsafe fn tensor_ref<'a>(tensor: TensorContext) -> &'a RefTensor {
    &*(tensor.as_ptr() as *const RefTensor)
}

unsafe fn module_ref<'a>(module: ModuleContext) -> &'a ScriptModule {
    &*(module.as_ptr() as *const ScriptModule)
}

/// Evaluation value: tensors are shared views or intermediate results.
#[derive(Debug, Clone)]
enum Slot {
    Tensor(Rc<RefTensor>),
    Tuple(Vec<Slot>),
}

impl Slot {
    fn kind(&self) -> &'static str {
        match self {
            Slot::Tensor(_) => "Tensor",
            Slot::Tuple(_) => "Tuple",
        }
    }
}

/// Wraps an argument tree, checking it against the declared parameter type.
unsafe fn import(node: &RawIValue, ty: &ScriptType) -> Result<Slot, String> {
    match (node.tag, ty) {
        (IVALUE_TENSOR, ScriptType::Tensor) => {
            let context = node
                .tensor_context()
                .ok_or_else(|| "null tensor argument".to_string())?;
            Ok(Slot::Tensor(Rc::new(tensor_ref(context).view())))
        }
        (IVALUE_TUPLE, ScriptType::Tuple(elements)) => {
            let items = raw::tuple_items(node).map_err(|err| err.to_string())?;
            if items.len() != elements.len() {
                return Err(format!(
                    "Expected a value of type '{ty}' but found a tuple of {} element(s)",
                    items.len()
                ));
            }
            items
                .iter()
                .zip(elements)
                .map(|(item, element)| import(item, element))
                .collect::<Result<Vec<_>, _>>()
                .map(Slot::Tuple)
        }
        (IVALUE_TENSOR, _) => Err(format!("Expected a value of type '{ty}' but instead found type 'Tensor'")),
        (IVALUE_TUPLE, _) => Err(format!("Expected a value of type '{ty}' but instead found type 'Tuple'")),
        (tag, _) => Err(format!("unknown boundary node tag {tag}")),
    }
}

fn evaluate(expr: &Expr, scope: &HashMap<&str, Slot>) -> Result<Slot, String> {
    match expr {
        Expr::Var(name) => scope
            .get(name.as_str())
            .cloned()
            .ok_or_else(|| format!("undefined value {name}")),
        Expr::Binary(op, lhs, rhs) => match (evaluate(lhs, scope)?, evaluate(rhs, scope)?) {
            (Slot::Tensor(a), Slot::Tensor(b)) => {
                RefTensor::binary(*op, &a, &b).map(|out| Slot::Tensor(Rc::new(out)))
            }
            (a, b) => Err(format!(
                "operator '{}' expects Tensor operands, found {} and {}",
                op.symbol(),
                a.kind(),
                b.kind()
            )),
        },
        Expr::Tuple(items) => items
            .iter()
            .map(|item| evaluate(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Slot::Tuple),
        Expr::Index(base, index) => match evaluate(base, scope)? {
            Slot::Tuple(mut items) if *index < items.len() => Ok(items.swap_remove(*index)),
            other => Err(format!("cannot index {} with {index}", other.kind())),
        },
    }
}

fn run(method: &ScriptMethod, args: &[RawIValue]) -> Result<Slot, String> {
    if args.len() > method.params.len() {
        return Err(format!(
            "{}() expected at most {} argument(s) but received {} argument(s). Declaration: {}",
            method.name,
            method.params.len(),
            args.len(),
            method.declaration()
        ));
    }
    if let Some(Param { name, .. }) = method.params.get(args.len()) {
        return Err(format!(
            "{}() is missing value for argument '{}'. Declaration: {}",
            method.name,
            name,
            method.declaration()
        ));
    }
    let mut scope: HashMap<&str, Slot> = HashMap::new();
    for (param, arg) in method.params.iter().zip(args) {
        // SAFETY: argument nodes are well-formed trees of this engine's tensors.
        let slot = unsafe { import(arg, &param.ty) }.map_err(|msg| {
            format!("{} for argument '{}'. Declaration: {}", msg, param.name, method.declaration())
        })?;
        scope.insert(param.name.as_str(), slot);
    }
    for (target, expr) in &method.body {
        let value = evaluate(expr, &scope)?;
        scope.insert(target.as_str(), value);
    }
    evaluate(&method.ret, &scope)
}

fn schema_returns(method: &ScriptMethod) -> Vec<MethodArgument> {
    vec![MethodArgument::new("", method.ret_ty.to_string())]
}

fn schema_arguments(method: &ScriptMethod) -> Vec<MethodArgument> {
    method
        .params
        .iter()
        .map(|param| MethodArgument::new(param.name.clone(), param.ty.to_string()))
        .collect()
}

fn lookup<'m>(module: &'m ScriptModule, name: &str) -> Result<&'m ScriptMethod, NativeError> {
    module
        .method(name)
        .ok_or_else(|| NativeError::new(format!("Method '{name}' is not defined.")))
}

#[derive(Debug, Serialize, Deserialize)]
struct ModuleFile {
    format: String,
    source: String,
    methods: Vec<MethodRecord>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct MethodRecord {
    name: String,
    arguments: Vec<MethodArgument>,
    returns: Vec<MethodArgument>,
}

fn method_records(module: &ScriptModule) -> Vec<MethodRecord> {
    module
        .methods
        .iter()
        .map(|method| MethodRecord {
            name: method.name.clone(),
            arguments: schema_arguments(method),
            returns: schema_returns(method),
        })
        .collect()
}

fn read_module(path: &Path) -> anyhow::Result<ScriptModule> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read module file {}", path.display()))?;
    let file: ModuleFile = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse module file {}", path.display()))?;
    if file.format != MODULE_FORMAT {
        bail!(
            "module file {} has format '{}', expected '{}'",
            path.display(),
            file.format,
            MODULE_FORMAT
        );
    }
    let module = script::compile(&file.source)
        .with_context(|| format!("failed to compile module file {}", path.display()))?;
    if method_records(&module) != file.methods {
        bail!(
            "module file {} lists methods that do not match its source",
            path.display()
        );
    }
    Ok(module)
}

fn write_module(module: &ScriptModule, path: &Path) -> anyhow::Result<()> {
    let file = ModuleFile {
        format: MODULE_FORMAT.to_string(),
        source: module.source.clone(),
        methods: method_records(module),
    };
    let text = serde_json::to_string_pretty(&file).context("failed to serialize module")?;
    fs::write(path, text).with_context(|| format!("failed to write module file {}", path.display()))
}

fn native(err: anyhow::Error) -> NativeError {
    NativeError::new(format!("{err:#}"))
}

impl NativeEngine for RefEngine {
    fn name(&self) -> &str {
        "ref"
    }

    unsafe fn new_tensor(
        &self,
        data: NonNull<u8>,
        dims: &[i64],
        dtype: DType,
    ) -> Result<TensorContext, NativeError> {
        let dims = dims
            .iter()
            .map(|&dim| usize::try_from(dim))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| NativeError::new(format!("negative dimension in shape {dims:?}")))?;
        let len = dims
            .iter()
            .try_fold(dtype.size_in_bytes(), |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| NativeError::new(format!("shape {dims:?} is too large")))?;
        Ok(self.adopt_tensor(RefTensor {
            dims,
            dtype,
            storage: Storage::View {
                ptr: data.as_ptr(),
                len,
            },
        }))
    }

    unsafe fn tensor_shape(&self, tensor: TensorContext) -> Vec<i64> {
        tensor_ref(tensor).dims.iter().map(|&dim| dim as i64).collect()
    }

    unsafe fn tensor_dtype(&self, tensor: TensorContext) -> Option<DType> {
        Some(tensor_ref(tensor).dtype)
    }

    unsafe fn tensor_data(&self, tensor: TensorContext) -> *const u8 {
        tensor_ref(tensor).bytes().as_ptr()
    }

    unsafe fn clone_tensor(&self, tensor: TensorContext) -> Result<TensorContext, NativeError> {
        Ok(self.adopt_tensor(tensor_ref(tensor).to_owned_copy()))
    }

    unsafe fn release_tensor(&self, tensor: TensorContext) {
        drop(Box::from_raw(tensor.as_ptr() as *mut RefTensor));
        self.live_tensors.fetch_sub(1, Ordering::SeqCst);
    }

    fn compile_script(&self, source: &str) -> Result<ModuleContext, NativeError> {
        let module = script::compile(source).map_err(|err| NativeError::new(err.to_string()))?;
        debug!(methods = module.methods.len(), "compiled reference script");
        Ok(self.adopt_module(module))
    }

    fn load_module(&self, path: &Path) -> Result<ModuleContext, NativeError> {
        let module = read_module(path).map_err(native)?;
        Ok(self.adopt_module(module))
    }

    unsafe fn save_module(&self, module: ModuleContext, path: &Path) -> Result<(), NativeError> {
        write_module(module_ref(module), path).map_err(native)
    }

    unsafe fn method_names(&self, module: ModuleContext) -> Vec<String> {
        module_ref(module)
            .methods
            .iter()
            .map(|method| method.name.clone())
            .collect()
    }

    unsafe fn method_arguments(
        &self,
        module: ModuleContext,
        method: &str,
    ) -> Result<Vec<MethodArgument>, NativeError> {
        lookup(module_ref(module), method).map(schema_arguments)
    }

    unsafe fn method_returns(
        &self,
        module: ModuleContext,
        method: &str,
    ) -> Result<Vec<MethodArgument>, NativeError> {
        lookup(module_ref(module), method).map(schema_returns)
    }

    unsafe fn run_method(
        &self,
        module: ModuleContext,
        method: &str,
        args: &[RawIValue],
    ) -> Result<RawIValue, NativeError> {
        let method = lookup(module_ref(module), method)?;
        let result = run(method, args).map_err(NativeError::new)?;
        self.export(&result)
    }

    unsafe fn release_module(&self, module: ModuleContext) {
        drop(Box::from_raw(module.as_ptr() as *mut ScriptModule));
        self.live_modules.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor_node(engine: &RefEngine, values: &[f32]) -> (Vec<u8>, TensorContext) {
        let mut bytes: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        let data = NonNull::new(bytes.as_mut_ptr()).unwrap();
        let dims = [values.len() as i64];
        let context = unsafe { engine.new_tensor(data, &dims, DType::Float) }.unwrap();
        (bytes, context)
    }

    #[test]
    fn arity_errors_use_native_phrasing() {
        let engine = RefEngine::new();
        let module = engine.compile_script("def sum(a, b):\n    return a + b\n").unwrap();
        let (_bytes, a) = tensor_node(&engine, &[1.0]);
        let args = [RawIValue::tensor(a)];
        let err = unsafe { engine.run_method(module, "sum", &args) }.unwrap_err();
        assert_eq!(
            err.message(),
            "sum() is missing value for argument 'b'. Declaration: sum(Tensor a, Tensor b) -> Tensor"
        );
        let args = [RawIValue::tensor(a), RawIValue::tensor(a), RawIValue::tensor(a)];
        let err = unsafe { engine.run_method(module, "sum", &args) }.unwrap_err();
        assert!(err.message().starts_with("sum() expected at most 2 argument(s)"));
        let err = unsafe { engine.run_method(module, "mul", &[]) }.unwrap_err();
        assert_eq!(err.message(), "Method 'mul' is not defined.");

        unsafe {
            engine.release_tensor(a);
            engine.release_module(module);
        }
        assert_eq!(engine.live_tensors(), 0);
        assert_eq!(engine.live_modules(), 0);
    }

    #[test]
    fn identity_results_are_fresh_copies() {
        let engine = RefEngine::new();
        let module = engine.compile_script("def id(a):\n    return a\n").unwrap();
        let (bytes, a) = tensor_node(&engine, &[3.0, 4.0]);
        let out = unsafe { engine.run_method(module, "id", &[RawIValue::tensor(a)]) }.unwrap();
        let result = out.tensor_context().unwrap();
        assert_ne!(result, a);
        unsafe {
            assert_ne!(engine.tensor_data(result), bytes.as_ptr());
            assert_eq!(engine.tensor_shape(result), vec![2]);
            engine.release_tensor(result);
            engine.release_tensor(a);
            engine.release_module(module);
        }
        assert_eq!(engine.live_tensors(), 0);
    }

    #[test]
    fn tuple_arguments_are_type_checked() {
        let engine = RefEngine::new();
        let module = engine
            .compile_script("def first(t: Tuple[Tensor, Tensor]):\n    return t[0]\n")
            .unwrap();
        let (_bytes, a) = tensor_node(&engine, &[1.0]);
        let err = unsafe { engine.run_method(module, "first", &[RawIValue::tensor(a)]) }.unwrap_err();
        assert!(err.message().starts_with("Expected a value of type 'Tuple[Tensor, Tensor]'"));
        assert!(err.message().contains("for argument 't'"));
        unsafe {
            engine.release_tensor(a);
            engine.release_module(module);
        }
    }
}
