//! Pipeline Benchmarks
//!
//! Template compilation, and the render-plus-patch cycle for keyed lists.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reflex_core::compiler::{compile, CompilerOptions};
use reflex_core::graph::flush;
use reflex_core::reactive::reactive;
use reflex_core::render::{Mount, MountOptions, RecordingHost};
use reflex_core::value::Value;

const TODO_APP: &str = r#"
<section class="app">
  <header><h1>Todos</h1><p>Static header</p></header>
  <input v-model.trim="draft" @keyup.enter="add()">
  <ul>
    <li v-for="(item, i) in items" :key="item.id" :class="{ done: item.done }">
      <label @click.stop="item.done = !item.done">{{ i }}: {{ item.title | upper }}</label>
    </li>
  </ul>
  <footer v-if="items.length">{{ items.length }} left</footer>
</section>
"#;

const LIST: &str = r#"<ul><li v-for="item in items" :key="item.id">{{ item.title }}</li></ul>"#;

fn items(ids: impl Iterator<Item = usize>) -> Value {
    Value::array(ids.map(|id| {
        Value::object([
            ("id", Value::from(id)),
            ("title", Value::from(format!("item {id}"))),
        ])
    }))
}

fn bench_compile(c: &mut Criterion) {
    let options = CompilerOptions::default();
    c.bench_function("compile_todo_app", |b| {
        b.iter(|| compile(black_box(TODO_APP), &options))
    });
}

fn bench_keyed_patch(c: &mut Criterion) {
    let template = Arc::new(compile(LIST, &CompilerOptions::default()));
    let mut group = c.benchmark_group("keyed_patch");

    for size in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("reverse", size), &size, |b, &size| {
            let state = reactive(Value::object([("items", items(0..size))]));
            let mut host = RecordingHost::new();
            let root = host.create_root("div");
            let app = Mount::new(template.clone(), state.clone(), host, root, MountOptions::default());
            let view = state.as_observed().cloned();
            let mut forward = true;

            b.iter(|| {
                forward = !forward;
                let next = if forward { items(0..size) } else { items((0..size).rev()) };
                if let Some(view) = &view {
                    view.set("items", next);
                }
                flush().ok();
                app.with_host_mut(|h| h.clear_ops());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compile, bench_keyed_patch);
criterion_main!(benches);
