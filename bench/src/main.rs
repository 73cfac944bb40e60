use kiln::jit::RuntimeHooks;
use kiln::loader::{Assembly, FunctionDecl, InstructionDecl, Loader};
use kiln::{Binder, JitCompiler, RuntimeConfig, TypeRegistry, Verifier, VirtualMachine};
use serde::Serialize;
use std::cell::Cell;
use std::time::Instant;

#[derive(Serialize)]
struct BenchmarkResult {
    name: String,
    /// Load, verify, compile and link
    kiln_load_secs: f64,
    kiln_run_secs: f64,
    rust_time_secs: f64,
    result: i32,
}

#[derive(Serialize)]
struct PipelineResult {
    functions: usize,
    instructions: usize,
    parse_secs: f64,
    verify_secs: f64,
    compile_secs: f64,
    link_secs: f64,
    code_bytes: usize,
    functions_per_sec: f64,
    result: i32,
}

#[derive(Serialize)]
struct BenchmarkOutput {
    results: Vec<BenchmarkResult>,
    pipeline: Vec<PipelineResult>,
}

// Rust reference implementations

fn rust_sum_loop() -> i32 {
    let mut sum: i32 = 0;
    let mut i: i32 = 0;
    while i < 1_000_000 {
        sum = sum.wrapping_add(i);
        i += 1;
    }
    sum
}

fn rust_fibonacci(n: i32) -> i32 {
    if n < 2 {
        n
    } else {
        rust_fibonacci(n - 1) + rust_fibonacci(n - 2)
    }
}

fn time_rust(f: impl Fn() -> i32) -> f64 {
    let start = Instant::now();
    std::hint::black_box(f());
    start.elapsed().as_secs_f64()
}

fn op(source: &str) -> InstructionDecl {
    serde_json::from_str(source).unwrap_or_else(|e| panic!("bad instruction {}: {}", source, e))
}

fn function(
    name: &str,
    params: &[&str],
    returns: &str,
    locals: &[&str],
    body: &[&str],
) -> FunctionDecl {
    FunctionDecl {
        name: name.to_string(),
        class: None,
        constructor: false,
        params: params.iter().map(|p| p.to_string()).collect(),
        returns: returns.to_string(),
        locals: locals.iter().map(|l| l.to_string()).collect(),
        instructions: body.iter().map(|i| op(i)).collect(),
    }
}

fn sum_loop_assembly() -> Assembly {
    Assembly {
        classes: vec![],
        functions: vec![function(
            "main",
            &[],
            "Int",
            &["Int", "Int"],
            &[
                r#"{"op": "LoadLocal", "index": 0}"#,
                r#"{"op": "LoadInt", "value": 1000000}"#,
                r#"{"op": "BranchGreaterThanOrEqual", "target": 12}"#,
                r#"{"op": "LoadLocal", "index": 1}"#,
                r#"{"op": "LoadLocal", "index": 0}"#,
                r#"{"op": "Add"}"#,
                r#"{"op": "StoreLocal", "index": 1}"#,
                r#"{"op": "LoadLocal", "index": 0}"#,
                r#"{"op": "LoadInt", "value": 1}"#,
                r#"{"op": "Add"}"#,
                r#"{"op": "StoreLocal", "index": 0}"#,
                r#"{"op": "Branch", "target": 0}"#,
                r#"{"op": "LoadLocal", "index": 1}"#,
                r#"{"op": "Return"}"#,
            ],
        )],
    }
}

fn fibonacci_assembly(n: i32) -> Assembly {
    let load_n = format!(r#"{{"op": "LoadInt", "value": {}}}"#, n);
    Assembly {
        classes: vec![],
        functions: vec![
            function(
                "fib",
                &["Int"],
                "Int",
                &[],
                &[
                    r#"{"op": "LoadArgument", "index": 0}"#,
                    r#"{"op": "LoadInt", "value": 2}"#,
                    r#"{"op": "BranchGreaterThanOrEqual", "target": 5}"#,
                    r#"{"op": "LoadArgument", "index": 0}"#,
                    r#"{"op": "Return"}"#,
                    r#"{"op": "LoadArgument", "index": 0}"#,
                    r#"{"op": "LoadInt", "value": 1}"#,
                    r#"{"op": "Sub"}"#,
                    r#"{"op": "Call", "name": "fib", "params": ["Int"]}"#,
                    r#"{"op": "LoadArgument", "index": 0}"#,
                    r#"{"op": "LoadInt", "value": 2}"#,
                    r#"{"op": "Sub"}"#,
                    r#"{"op": "Call", "name": "fib", "params": ["Int"]}"#,
                    r#"{"op": "Add"}"#,
                    r#"{"op": "Return"}"#,
                ],
            ),
            function(
                "main",
                &[],
                "Int",
                &[],
                &[
                    &load_n,
                    r#"{"op": "Call", "name": "fib", "params": ["Int"]}"#,
                    r#"{"op": "Return"}"#,
                ],
            ),
        ],
    }
}

/// A chain of `count` functions where each adds its index and calls the
/// previous one.
fn chain_assembly(count: usize) -> Assembly {
    let mut functions = Vec::with_capacity(count + 1);
    for i in 0..count {
        let load_index = format!(r#"{{"op": "LoadInt", "value": {}}}"#, i);
        let call_previous = format!(
            r#"{{"op": "Call", "name": "f{}", "params": ["Int"]}}"#,
            i.saturating_sub(1)
        );
        let mut body = vec![r#"{"op": "LoadArgument", "index": 0}"#, load_index.as_str(), r#"{"op": "Add"}"#];
        if i > 0 {
            body.push(&call_previous);
        }
        body.push(r#"{"op": "Return"}"#);
        functions.push(function(&format!("f{}", i), &["Int"], "Int", &[], &body));
    }

    let call_last = format!(
        r#"{{"op": "Call", "name": "f{}", "params": ["Int"]}}"#,
        count.saturating_sub(1)
    );
    functions.push(function(
        "main",
        &[],
        "Int",
        &[],
        &[r#"{"op": "LoadInt", "value": 0}"#, &call_last, r#"{"op": "Return"}"#],
    ));

    Assembly {
        classes: vec![],
        functions,
    }
}

fn run_kiln(name: &str, assembly: &Assembly, rust_time: f64) -> BenchmarkResult {
    let config = RuntimeConfig {
        call_stack_size: 100_000,
        ..Default::default()
    };
    let mut vm = VirtualMachine::new(config).expect("vm should start");

    let start = Instant::now();
    vm.load_assembly(assembly)
        .unwrap_or_else(|e| panic!("{}: {}", name, e));
    let load = start.elapsed().as_secs_f64();

    let start = Instant::now();
    let result = vm.run_main().unwrap_or_else(|e| panic!("{}: {}", name, e));
    let run = start.elapsed().as_secs_f64();

    BenchmarkResult {
        name: name.to_string(),
        kiln_load_secs: load,
        kiln_run_secs: run,
        rust_time_secs: rust_time,
        result,
    }
}

fn run_pipeline(count: usize) -> PipelineResult {
    let assembly = chain_assembly(count);
    let instructions = assembly.functions.iter().map(|f| f.instructions.len()).sum();

    // The chain never allocates, so the heap hooks stay unset.
    let call_depth = Cell::new(0i64);
    let hooks = RuntimeHooks {
        call_depth: call_depth.as_ptr() as usize,
        call_depth_limit: count as i32 + 16,
        heap: 0,
        new_array: 0,
        new_object: 0,
    };
    let mut types = TypeRegistry::new();
    let mut binder = Binder::new();
    let mut jit = JitCompiler::new(hooks).expect("jit should start");

    let start = Instant::now();
    let mut functions = Loader::new(&mut types, &mut binder)
        .load(&assembly)
        .expect("chain should load");
    let parse = start.elapsed().as_secs_f64();

    let start = Instant::now();
    let mut verifier = Verifier::new(&types, &binder);
    for function in &mut functions {
        verifier.verify_function(function).expect("chain should verify");
    }
    let verify = start.elapsed().as_secs_f64();

    let start = Instant::now();
    for function in &functions {
        jit.compile(&types, &binder, function)
            .expect("chain should compile");
    }
    let compile = start.elapsed().as_secs_f64();

    let start = Instant::now();
    let linked = jit.make_executable(&mut binder).expect("chain should link");
    let link = start.elapsed().as_secs_f64();
    let code_bytes = linked.iter().map(|f| f.code.len()).sum();

    let config = RuntimeConfig {
        call_stack_size: count as u32 + 16,
        ..Default::default()
    };
    let mut vm = VirtualMachine::new(config).expect("vm should start");
    vm.load_assembly(&assembly).expect("chain should load");
    let result = vm.run_main().expect("chain should run");
    let expected = (0..count as i32).fold(0i32, |acc, i| acc.wrapping_add(i));
    assert_eq!(result, expected);

    let total = verify + compile + link;
    PipelineResult {
        functions: assembly.functions.len(),
        instructions,
        parse_secs: parse,
        verify_secs: verify,
        compile_secs: compile,
        link_secs: link,
        code_bytes,
        functions_per_sec: assembly.functions.len() as f64 / total.max(f64::EPSILON),
        result,
    }
}

fn main() {
    let mut results = Vec::new();

    let rust_time = time_rust(rust_sum_loop);
    results.push(run_kiln("sum_loop", &sum_loop_assembly(), rust_time));

    let rust_time = time_rust(|| rust_fibonacci(27));
    results.push(run_kiln("fibonacci", &fibonacci_assembly(27), rust_time));

    let pipeline = [100, 1_000, 5_000].into_iter().map(run_pipeline).collect();

    let output = BenchmarkOutput { results, pipeline };
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to serialize results: {}", e),
    }
}
