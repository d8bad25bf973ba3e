use std::path::Path;

use console::Style;
use geolapse_core::flatten::Bucket;
use geolapse_core::pipeline::{AnimationConfig, RunSummary};

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
    warning: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
            warning: Style::new().yellow(),
        }
    }
}

fn underline(s: &Styles, title: &str) {
    println!("  {}", s.title.apply_to(title));
    println!(
        "  {}",
        s.title.apply_to("\u{2550}".repeat(title.chars().count()))
    );
    println!();
}

fn pair_text(pair: Option<[f64; 2]>) -> Option<String> {
    pair.map(|[a, b]| format!("{a} {b}"))
}

pub fn print_run_plan(config: &AnimationConfig, catalog: &Path) {
    let s = Styles::new();

    println!();
    underline(&s, "Geolapse Run");

    println!(
        "  {:<14}{}",
        s.label.apply_to("Catalog"),
        s.path.apply_to(catalog.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Output"),
        s.path.apply_to(config.output_path().display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Backend"),
        s.method.apply_to(&config.backend)
    );
    println!();

    println!("  {}", s.header.apply_to("Area"));
    match (&config.area.geojson, config.area.latlon) {
        (Some(path), _) => println!(
            "    {:<12}{}",
            s.label.apply_to("GeoJSON"),
            s.path.apply_to(path.display())
        ),
        (None, Some([lat, lon])) => println!(
            "    {:<12}{}",
            s.label.apply_to("Center"),
            s.value.apply_to(format!("{lat:.4}, {lon:.4}"))
        ),
        (None, None) => println!(
            "    {:<12}{}",
            s.label.apply_to("Center"),
            s.disabled.apply_to("missing")
        ),
    }
    if let Some(resolution) = config.area.resolution {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Resolution"),
            s.value.apply_to(format!("{resolution} m"))
        );
    }
    if let Some(tilesize) = config.area.tilesize {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Tile"),
            s.value.apply_to(format!(
                "{tilesize} px + {} pad",
                config.area.pad.unwrap_or(0)
            ))
        );
    }
    println!();

    println!("  {}", s.header.apply_to("Scenes"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Products"),
        s.value.apply_to(config.products.join(", "))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Time"),
        s.value.apply_to(format!(
            "{} .. {}",
            config.start_datetime, config.end_datetime
        ))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Sort"),
        s.method.apply_to(format!("{} {}", config.sort_field, config.sort_order))
    );
    match config.flatten {
        Some(granularity) => println!(
            "    {:<12}{}",
            s.label.apply_to("Flatten"),
            s.method.apply_to(granularity)
        ),
        None => println!(
            "    {:<12}{}",
            s.label.apply_to("Flatten"),
            s.disabled.apply_to("none")
        ),
    }
    println!();

    println!("  {}", s.header.apply_to("Rendering"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Bands"),
        s.value.apply_to(config.bands.join(" "))
    );
    if let Some(scales) = &config.scales {
        let text: Vec<String> = scales.iter().map(|[a, b]| format!("[{a}, {b}]")).collect();
        println!(
            "    {:<12}{}",
            s.label.apply_to("Scales"),
            s.value.apply_to(text.join(" "))
        );
    } else if let Some(text) = pair_text(config.rescale) {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Rescale"),
            s.value.apply_to(format!("{text} percentiles"))
        );
    } else {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Rescale"),
            s.disabled.apply_to("none")
        );
    }
    if config.display_bands().len() == 1 {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Colormap"),
            s.method.apply_to(config.cmap)
        );
    }
    println!(
        "    {:<12}{}",
        s.label.apply_to("FPS"),
        s.value.apply_to(config.fps)
    );
    if config.coregister {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Coregister"),
            s.method.apply_to(format!("reference frame {}", config.reference_index))
        );
    }
    println!();
}

pub fn print_bucket_table(buckets: &[Bucket]) {
    let s = Styles::new();

    println!();
    underline(&s, "Scene Groups");
    for (i, bucket) in buckets.iter().enumerate() {
        println!(
            "  {:>4}  {}  {}",
            s.label.apply_to(i),
            s.value.apply_to(bucket.label()),
            s.method.apply_to(format!("{} scene(s)", bucket.len()))
        );
        for scene in &bucket.scenes {
            let cloud = scene
                .cloud_fraction
                .map_or_else(|| "-".to_string(), |c| format!("{c:.2}"));
            println!(
                "          {}  {}",
                s.path.apply_to(&scene.id),
                s.label.apply_to(format!("cloud {cloud}"))
            );
        }
    }
    println!();
    println!(
        "  {} frame(s) from {} scene(s)",
        s.value.apply_to(buckets.len()),
        s.value.apply_to(buckets.iter().map(Bucket::len).sum::<usize>())
    );
    println!();
}

pub fn print_run_summary(summary: &RunSummary) {
    let s = Styles::new();

    println!();
    underline(&s, "Result");
    println!(
        "  {:<14}{}",
        s.label.apply_to("Animation"),
        s.path.apply_to(summary.output.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Frames"),
        s.value.apply_to(format!(
            "{} ({} scenes)",
            summary.frame_count,
            summary.scene_count()
        ))
    );
    for (i, band) in summary.scales.bands.iter().enumerate() {
        println!(
            "  {:<14}{}",
            s.label.apply_to(format!("Band {i}")),
            s.value.apply_to(format!("[{}, {}]", band.min, band.max))
        );
    }
    for path in &summary.exports {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Export"),
            s.path.apply_to(path.display())
        );
    }

    let dropped = summary.failed.len() + summary.filtered.len();
    if dropped > 0 {
        println!();
        println!("  {}", s.header.apply_to("Dropped"));
        for bucket in &summary.failed {
            println!(
                "    {}  {}",
                s.value.apply_to(&bucket.key),
                s.warning.apply_to(&bucket.reason)
            );
        }
        for bucket in &summary.filtered {
            println!(
                "    {}  {}",
                s.value.apply_to(&bucket.key),
                s.disabled.apply_to(&bucket.reason)
            );
        }
    }
    if !summary.warnings.is_empty() {
        println!();
        println!("  {}", s.header.apply_to("Registration"));
        for (key, warning) in &summary.warnings {
            println!(
                "    {}  {}",
                s.value.apply_to(key.format("%Y-%m-%dT%H:%M:%SZ")),
                s.warning.apply_to(warning)
            );
        }
    }
    if !summary.export_errors.is_empty() {
        println!();
        println!("  {}", s.header.apply_to("Export errors"));
        for error in &summary.export_errors {
            println!("    {}", s.warning.apply_to(error));
        }
    }
    println!();
}
