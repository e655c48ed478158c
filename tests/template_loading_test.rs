#[cfg(test)]
mod tests {
    use blockstream::config::EngineConfig;
    use blockstream::prelude::*;
    use blockstream::views::MemoryLoader;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, text: &str) {
        fs::write(dir.path().join(name), text).unwrap();
    }

    fn engine_for(dir: &TempDir) -> Engine {
        Engine::builder()
            .directory(dir.path().to_str().unwrap())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_from_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, "index.html", "<title>{title}</title>");

        let view = engine_for(&dir).create("index").await.unwrap();
        view.set([("title", "Home")]);
        assert_eq!(view.render_to_string().await.unwrap(), "<title>Home</title>");
    }

    #[tokio::test]
    async fn test_default_engine_with_absolute_path() {
        let dir = TempDir::new().unwrap();
        write(&dir, "page.html", "{#body}{text}{/body}");

        let view = blockstream::create(dir.path().join("page.html")).await.unwrap();
        view.set_in("body", [("text", "hello")]);
        assert_eq!(view.render_to_string().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_missing_file_fails_creation() {
        let dir = TempDir::new().unwrap();
        let err = engine_for(&dir).create("nope").await.unwrap_err();
        assert_eq!(err.error_code(), "E_IO");
    }

    #[tokio::test]
    async fn test_parse_error_in_file_fails_creation() {
        let dir = TempDir::new().unwrap();
        write(&dir, "broken.html", "ok\n  {/orphan}");

        let err = engine_for(&dir).create("broken").await.unwrap_err();
        assert!(err.is_parse_error());
    }

    #[tokio::test]
    async fn test_layout_with_partials() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "layout.html",
            "<body>{header}<ul>{#item}<li>{{row}}</li>{/item}</ul></body>",
        );
        write(&dir, "header.html", "<h1>{title|upper}</h1>");
        write(&dir, "row.html", "{name}{#badge} *{/badge}");

        let engine = engine_for(&dir);
        let view = engine.create("layout").await.unwrap();
        view.load("header", "header", None).await.unwrap();
        view.load("row", "row", Some("item")).await.unwrap();

        view.set([("title", "Team")])
            .add_mask("upper", |v: Value| {
                Value::from(v.to_text().unwrap_or_default().to_uppercase())
            })
            .set_iterator("item", json!([{"name": "Ann"}, {"name": "Bob"}]));

        assert_eq!(
            view.block_names(),
            vec!["header", "item", "item:row", "item:row:badge"]
        );

        assert_eq!(
            view.render_to_string().await.unwrap(),
            "<body><h1>TEAM</h1><ul><li>Ann *</li><li>Bob *</li></ul></body>"
        );

        view.remove("item:row:badge");
        assert_eq!(
            view.render_to_string().await.unwrap(),
            "<body><h1>TEAM</h1><ul><li>Ann</li><li>Bob</li></ul></body>"
        );
    }

    #[tokio::test]
    async fn test_load_into_unknown_block_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let view = engine_for(&dir).create_from_string("{slot}").unwrap();

        // no file is read, so the missing file is never noticed
        view.load("missing", "slot", Some("nowhere")).await.unwrap();
        assert_eq!(view.render_to_string().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_same_partial_loaded_twice() {
        let loader = MemoryLoader::new();
        loader.insert("views/cell.html", "<td>{v}</td>");
        let engine = Engine::builder().loader(loader).build().unwrap();

        let view = engine.create_from_string("{#a}{cell}{/a}{#b}{cell}{/b}").unwrap();
        view.load("cell", "cell", Some("a")).await.unwrap();
        view.load("cell", "cell", Some("b")).await.unwrap();
        view.set_in("a", [("v", 1)]).set_in("b", [("v", 2)]);

        assert!(view.has_block("a:cell") && view.has_block("b:cell"));
        assert_eq!(view.render_to_string().await.unwrap(), "<td>1</td><td>2</td>");
    }

    #[tokio::test]
    async fn test_engine_from_config_file() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("templates")).unwrap();
        fs::write(dir.path().join("templates/mail.txt"), "Dear {name}").unwrap();
        fs::write(
            dir.path().join("app.toml"),
            "[views]\ndirectory = \"templates\"\nextension = \"txt\"\ncache_enabled = false\n",
        )
        .unwrap();

        let config = EngineConfig::from_file(dir.path().join("app.toml")).unwrap();
        let engine = Engine::with_config(config);
        assert!(!engine.config().cache_enabled);

        let view = engine.create("mail").await.unwrap();
        view.set([("name", "Ann & Bob")]);
        assert_eq!(view.render_to_string().await.unwrap(), "Dear Ann &amp; Bob");
    }
}
