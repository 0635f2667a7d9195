use std::path::PathBuf;

use xl_ast::TreeId;
use xl_bench::{constant_cases_program, factorial_program, overload_program};
use xl_codegen::{BackendConfig, MirBackend, collect_pass_stats, compile_program};
use xl_infer::TypeInference;

struct ScenarioMetric {
    name: &'static str,
    function_count: usize,
    branch_count: usize,
    guard_count: usize,
    call_count: usize,
    primitive_count: usize,
    form_error_count: usize,
}

fn main() -> Result<(), String> {
    let metrics = vec![
        reduce_scenario("factorial", factorial_program(8))?,
        reduce_scenario("constant_cases", constant_cases_program(16))?,
        reduce_scenario("overloads", overload_program(16))?,
    ];
    let json = render_metrics_json(&metrics);

    if let Some(path) = std::env::args().nth(1) {
        let path = PathBuf::from(path);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|err| format!("failed to create `{}`: {err}", parent.display()))?;
        }
        std::fs::write(&path, json)
            .map_err(|err| format!("failed to write `{}`: {err}", path.display()))?;
    } else {
        println!("{json}");
    }

    Ok(())
}

fn reduce_scenario(
    name: &'static str,
    (mut e, program): (TypeInference, TreeId),
) -> Result<ScenarioMetric, String> {
    if !e.type_check(program) {
        return Err(format!(
            "scenario `{name}` failed to type-check: {:?}",
            e.errors()
        ));
    }
    let mut backend = MirBackend::new(BackendConfig::default());
    compile_program(&e, &mut backend, name, program)
        .map_err(|err| format!("failed to reduce scenario `{name}`: {err}"))?;
    let stats = collect_pass_stats(backend.module());
    let total = |count: fn(&xl_codegen::FunctionPassStats) -> usize| {
        stats.per_function.iter().map(count).sum::<usize>()
    };

    Ok(ScenarioMetric {
        name,
        function_count: stats.per_function.len(),
        branch_count: total(|f| f.branch_count),
        guard_count: total(|f| f.guard_count),
        call_count: total(|f| f.call_count),
        primitive_count: total(|f| f.primitive_count),
        form_error_count: total(|f| f.form_error_count),
    })
}

fn render_metrics_json(metrics: &[ScenarioMetric]) -> String {
    let rows = metrics
        .iter()
        .map(|metric| {
            format!(
                "    {{\"name\":\"{}\",\"function_count\":{},\"branch_count\":{},\"guard_count\":{},\"call_count\":{},\"primitive_count\":{},\"form_error_count\":{}}}",
                metric.name,
                metric.function_count,
                metric.branch_count,
                metric.guard_count,
                metric.call_count,
                metric.primitive_count,
                metric.form_error_count
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");
    format!("{{\n  \"scenarios\": [\n{rows}\n  ]\n}}\n")
}
