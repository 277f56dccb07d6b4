use std::ffi::CString;
use std::ptr;

use jitlink::boundary::{raw, RawIValue, IVALUE_TUPLE};
use jitlink::engine::ffi::{self, FfiError};
use jitlink::engine::TensorContext;
use jitlink::DType;
use jitlink_c_runtime::*;

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

#[test]
fn tensors_expose_shape_dtype_and_data() {
    let mut data = f32_bytes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let dims = [3i64, 2];
    let mut err = FfiError::none();
    unsafe {
        let tensor = jitlink_tensor_new(data.as_mut_ptr(), dims.as_ptr(), 2, DType::Float.tag(), &mut err);
        assert!(!tensor.is_null());
        assert_eq!(jitlink_tensor_ndim(tensor), 2);
        let mut out = [0i64; 2];
        jitlink_tensor_dims(tensor, out.as_mut_ptr());
        assert_eq!(out, [3, 2]);
        assert_eq!(jitlink_tensor_dtype(tensor), DType::Float.tag());
        assert_eq!(jitlink_tensor_data(tensor), data.as_ptr() as *const u8);

        let copy = jitlink_tensor_clone(tensor, &mut err);
        assert!(!copy.is_null());
        assert_ne!(jitlink_tensor_data(copy), data.as_ptr() as *const u8);
        jitlink_tensor_free(copy);
        jitlink_tensor_free(tensor);
    }
}

#[test]
fn unknown_dtype_tags_are_reported() {
    let mut data = vec![0u8; 2];
    let dims = [1i64];
    let mut err = FfiError::none();
    let tensor = unsafe { jitlink_tensor_new(data.as_mut_ptr(), dims.as_ptr(), 1, 3, &mut err) };
    assert!(tensor.is_null());
    let message = unsafe { err.take() }.unwrap();
    assert_eq!(message.message(), "unsupported dtype tag 3");
}

#[test]
fn methods_run_through_the_c_abi() {
    let source = CString::new("def pair(a, b):\n    return (a + b, a * b)\n").unwrap();
    let name = CString::new("pair").unwrap();
    let mut err = FfiError::none();
    let mut lhs = f32_bytes(&[1.0, 2.0]);
    let mut rhs = f32_bytes(&[3.0, 4.0]);
    let dims = [2i64];
    unsafe {
        let module = jitlink_module_compile(source.as_ptr(), &mut err);
        assert!(!module.is_null(), "{:?}", err.take());

        let mut len = 0usize;
        let names = ffi::take_string_array(jitlink_module_method_names(module, &mut len), len);
        assert_eq!(names, vec!["pair".to_string()]);

        let arguments = ffi::take_argument_array(
            jitlink_method_arguments(module, name.as_ptr(), &mut len, &mut err),
            len,
        );
        assert_eq!(arguments.len(), 2);
        assert_eq!(arguments[1].name, "b");
        let returns = ffi::take_argument_array(
            jitlink_method_returns(module, name.as_ptr(), &mut len, &mut err),
            len,
        );
        assert_eq!(returns[0].type_name, "Tuple[Tensor, Tensor]");

        let a = jitlink_tensor_new(lhs.as_mut_ptr(), dims.as_ptr(), 1, DType::Float.tag(), &mut err);
        let b = jitlink_tensor_new(rhs.as_mut_ptr(), dims.as_ptr(), 1, DType::Float.tag(), &mut err);
        let args = [
            RawIValue::tensor(TensorContext::from_raw(a).unwrap()),
            RawIValue::tensor(TensorContext::from_raw(b).unwrap()),
        ];
        let mut out = RawIValue {
            tag: IVALUE_TUPLE,
            data: ptr::null_mut(),
        };
        assert!(jitlink_method_run(module, name.as_ptr(), args.as_ptr(), 2, &mut out, &mut err));
        let items = raw::tuple_items(&out).unwrap();
        assert_eq!(items.len(), 2);
        let product = items[1].tensor_context().unwrap();
        let data = std::slice::from_raw_parts(jitlink_tensor_data(product.as_ptr()), 8);
        assert_eq!(data, f32_bytes(&[3.0, 8.0]).as_slice());
        raw::free_tree(engine(), out);

        jitlink_tensor_free(a);
        jitlink_tensor_free(b);
        jitlink_module_free(module);
    }
}

#[test]
fn native_errors_come_back_verbatim() {
    let source = CString::new("def sum(a, b):\n    return a + b\n").unwrap();
    let missing = CString::new("nope").unwrap();
    let mut err = FfiError::none();
    unsafe {
        let module = jitlink_module_compile(source.as_ptr(), &mut err);
        let mut out = RawIValue {
            tag: IVALUE_TUPLE,
            data: ptr::null_mut(),
        };
        assert!(!jitlink_method_run(module, missing.as_ptr(), ptr::null(), 0, &mut out, &mut err));
        assert_eq!(err.take().unwrap().message(), "Method 'nope' is not defined.");

        let broken = CString::new("def f(a):\n    return a +\n").unwrap();
        assert!(jitlink_module_compile(broken.as_ptr(), &mut err).is_null());
        assert!(err.take().unwrap().message().starts_with("line 2:"));

        jitlink_module_free(module);
    }
}
