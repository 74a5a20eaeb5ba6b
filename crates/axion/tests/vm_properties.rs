//! Machine-level properties: bytecode layout, determinism, GC liveness,
//! and value-stack discipline.

use axion::{
    CaptureWriter, HEADER_LEN, MAGIC, MemoryByteStream, NoopTracer, Opcode, STORE_ADDRESS_RECORD_LEN, Script,
    VERSION, Vm, runtime_bindings,
};

fn compile(source: &str) -> Vec<u8> {
    let output = Script::new(source, "test.ax").compile();
    if output.bytecode.is_none() {
        panic!("compilation failed:\n{}", output.report());
    }
    output.bytecode.unwrap()
}

/// Runs compiled bytecode and hands back the finished VM for inspection.
fn run_vm(source: &str) -> (String, axion::VmState) {
    let bytecode = compile(source);
    let mut stream = MemoryByteStream::new(bytecode).expect("valid image");
    let mut writer = CaptureWriter::new();
    let mut vm = Vm::new(&mut stream, &mut writer, NoopTracer);
    for (name, func) in runtime_bindings() {
        vm.bind_function(name, func);
    }
    vm.execute().expect("execution failed");
    let state = vm.state;
    (writer.output, state)
}

#[test]
fn bytecode_starts_with_signature_and_prologue() {
    // a while loop guarantees at least one label
    let image = compile("module M; var i = 0; while i < 2 { i += 1; } print(i);");

    assert_eq!(&image[..4], MAGIC);
    assert_eq!(&image[4..12], VERSION);

    // every prologue record is a store_address whose target lands inside
    // the instruction body
    let mut pos = HEADER_LEN as usize;
    let mut labels = 0u64;
    while image[pos] == Opcode::StoreAddress as u8 {
        pos += STORE_ADDRESS_RECORD_LEN as usize;
        labels += 1;
    }
    assert!(labels >= 2, "expected loop labels in the prologue");

    let body_base = HEADER_LEN + labels * STORE_ADDRESS_RECORD_LEN;
    let mut record = HEADER_LEN as usize;
    for _ in 0..labels {
        let target = u64::from_le_bytes(image[record + 5..record + 13].try_into().unwrap());
        assert!(target >= body_base);
        assert!(target <= image.len() as u64);
        record += STORE_ADDRESS_RECORD_LEN as usize;
    }
}

#[test]
fn compilation_is_deterministic() {
    let source = "module M;
var total = 0;
func weigh(n) { if n > 10: return n * 2; return n; }
for (var i = 0; i < 5; i += 1) { total += weigh(i * 6); }
print(total);";
    assert_eq!(compile(source), compile(source));
}

#[test]
fn value_stack_is_balanced_after_loops() {
    let (output, state) = run_vm("module M; var i = 0; while i < 3 { i += 1; } print(i);");
    assert_eq!(output, "3\n");
    assert!(state.stack.is_empty());
    assert_eq!(state.frame_level, 0);
    assert_eq!(state.read_level, 0);
    assert_eq!(state.frames.len(), 1);
}

#[test]
fn value_stack_is_balanced_after_conditionals() {
    let source = "module M; var x = 1; if x: print('a'); else: print('b'); if x == 0: print('c');";
    let (output, state) = run_vm(source);
    assert_eq!(output, "a\n");
    assert!(state.stack.is_empty());
}

#[test]
fn function_locals_are_collectable_after_return() {
    let source = "module M; func f() { var a = 1; var b = a + 1; return b; } print(f());";
    let (output, mut state) = run_vm(source);
    assert_eq!(output, "2\n");

    // after a forced collection only the bound natives and the function
    // object survive; the call's locals are unreachable
    state.run_gc();
    let expected = runtime_bindings().len() + 1;
    assert_eq!(state.heap.num_objects(), expected);
}

#[test]
fn temporaries_do_not_accumulate() {
    let source = "module M; var total = 0; for (var i = 0; i < 50; i += 1) { total += i * 2 + 1; } print(total);";
    let (output, mut state) = run_vm(source);
    assert_eq!(output, "2500\n");

    state.run_gc();
    // natives + total (i died with the loop frame)
    let expected = runtime_bindings().len() + 1;
    assert_eq!(state.heap.num_objects(), expected);
}

#[test]
fn gc_threshold_steps_are_bounded() {
    // allocate enough short-lived objects to cross the suggestion
    // threshold several times
    let source = "module M;
func churn(n) { var s = ''; var i = 0; while i < n { s += 'x'; i += 1; } return s; }
var j = 0;
while j < 300 { churn(3); j += 1; }
print('done');";
    let (output, state) = run_vm(source);
    assert_eq!(output, "done\n");
    assert!(state.max_objects >= axion::GC_THRESHOLD_MIN);
    assert!(state.max_objects <= axion::GC_THRESHOLD_MAX);
}

#[test]
fn rejects_truncated_or_foreign_images() {
    assert!(MemoryByteStream::new(b"AXBC".to_vec()).is_err());
    assert!(MemoryByteStream::new(b"ELF\0version0".to_vec()).is_err());
}
