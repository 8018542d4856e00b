use std::fs::{self, File};

use camino::{Utf8Path, Utf8PathBuf};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, Rgb, RgbImage};
use sitepipe::{BuildError, Config, Layout, Mode, SitepipeError, tree_digest};

struct Project {
    _guard: tempfile::TempDir,
    root: Utf8PathBuf,
}

impl Project {
    /// A small site without a script entry, so no bundler is needed.
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        let project = Self { _guard: dir, root };
        project.write(
            "src/index.html",
            "<html><body>@@include('partials/nav.html', {\"active\": \"home\"})<img src=\"@img/dots.png\"></body></html>",
        );
        project.write("src/partials/nav.html", "<nav class=\"@@active\"></nav>");
        project.write("src/fonts/inter.woff2", "woff2");
        project.write("src/lib/vendor/x.js", "var x = 1;");
        project.write("src/scss/_vars.scss", "$gap: 4px;");
        project.write(
            "src/scss/style.scss",
            "@use 'vars';\n.grid { display: flex; gap: vars.$gap; user-select: none; }\n",
        );
        project.write_png("src/img/dots.png");
        project
    }

    fn write(&self, path: &str, text: &str) {
        let path = self.root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn write_png(&self, path: &str) {
        let img = RgbImage::from_fn(48, 48, |x, y| {
            if (x / 6 + y / 6) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });

        let mut data = Vec::new();
        PngEncoder::new_with_quality(&mut data, CompressionType::Fast, FilterType::NoFilter)
            .write_image(img.as_raw(), 48, 48, ExtendedColorType::Rgb8)
            .unwrap();

        let path = self.root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    fn config(&self, mode: Mode) -> Config {
        let layout = Layout::new(&self.root).unwrap();
        Config::new(layout, mode).with_esbuild("sitepipe-missing-esbuild")
    }

    fn out(&self, path: &str) -> Utf8PathBuf {
        self.root.join("public").join(path)
    }
}

fn read(path: &Utf8Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn build_assembles_output_tree() {
    let project = Project::new();

    sitepipe::build(&project.config(Mode::Development)).unwrap();

    assert_eq!(
        read(&project.out("index.html")),
        "<html><body><nav class=\"home\"></nav><img src=\"./img/dots.png\"></body></html>"
    );
    assert!(!project.out("nav.html").exists());
    assert!(!project.out("partials").exists());

    assert_eq!(read(&project.out("fonts/inter.woff2")), "woff2");
    assert_eq!(read(&project.out("lib/vendor/x.js")), "var x = 1;");
    assert_eq!(
        fs::read(project.out("img/dots.png")).unwrap(),
        fs::read(project.root.join("src/img/dots.png")).unwrap()
    );

    let css = read(&project.out("css/style.css"));
    assert!(css.starts_with(".grid{display:flex;gap:4px;user-select:none}"), "{css}");
    assert!(css.contains("sourceMappingURL=data:application/json"));

    // raw sources are mirrored next to the compiled output
    assert_eq!(read(&project.out("scss/_vars.scss")), "$gap: 4px;");

    // missing entries are skipped
    assert!(!project.out("css/bootstrap.min.css").exists());
    assert!(!project.out("js/main.js").exists());
}

#[test]
fn build_resets_previous_output() {
    let project = Project::new();
    project.write("public/stale.txt", "old");

    sitepipe::build(&project.config(Mode::Development)).unwrap();

    assert!(!project.out("stale.txt").exists());
    assert!(project.out("index.html").exists());
}

#[test]
fn build_is_deterministic() {
    let project = Project::new();
    let config = project.config(Mode::Production);

    sitepipe::build(&config).unwrap();
    let first = tree_digest(&config.layout.out).unwrap();

    sitepipe::build(&config).unwrap();
    let second = tree_digest(&config.layout.out).unwrap();

    assert_eq!(first, second);
}

#[test]
fn production_build_compresses_and_prefixes() {
    let project = Project::new();

    sitepipe::build(&project.config(Mode::Production)).unwrap();

    let source = fs::metadata(project.root.join("src/img/dots.png")).unwrap().len();
    let output = fs::metadata(project.out("img/dots.png")).unwrap().len();
    assert!(output <= source);

    let css = read(&project.out("css/style.css"));
    assert!(!css.contains("sourceMappingURL"));
    assert!(css.contains("user-select:none"), "{css}");
}

#[test]
fn stylesheet_error_fails_build() {
    let project = Project::new();
    project.write("src/scss/style.scss", ".grid { display: flex; ");

    let err = sitepipe::build(&project.config(Mode::Development)).unwrap_err();

    let SitepipeError::Build(BuildError::Tasks(failures)) = err else {
        panic!("expected task failures, got {err}");
    };
    assert_eq!(failures.names().collect::<Vec<_>>(), vec!["scss:style"]);
    assert_eq!(failures.0[0].1.title(), "SCSS");
}

#[test]
fn missing_include_fails_build() {
    let project = Project::new();
    project.write("src/about.html", "@@include('partials/missing.html')");

    let err = sitepipe::build(&project.config(Mode::Development)).unwrap_err();

    assert!(err.to_string().contains("about.html"), "{err}");
}

#[test]
fn deploy_zip_packages_output_tree() {
    let project = Project::new();
    let config = project.config(Mode::Production);

    let archive = sitepipe::deploy_zip(&config).unwrap();

    assert_eq!(archive, config.layout.archive());
    assert_eq!(archive.parent(), Some(config.layout.root.as_path()));

    let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
    let names: Vec<_> = (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect();

    assert_eq!(
        names,
        vec![
            "css/style.css",
            "fonts/inter.woff2",
            "img/dots.png",
            "index.html",
            "lib/vendor/x.js",
            "scss/_vars.scss",
            "scss/style.scss",
        ]
    );
}
