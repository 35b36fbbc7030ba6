//! Initial file set written into every new sandbox.

use serde::Deserialize;
use std::collections::BTreeMap;

const PACKAGE_JSON: &str = r#"{
  "name": "sandforge-app",
  "private": true,
  "version": "0.0.0",
  "type": "module",
  "scripts": {
    "dev": "vite",
    "build": "vite build",
    "preview": "vite preview"
  },
  "dependencies": {
    "react": "^18.3.1",
    "react-dom": "^18.3.1"
  },
  "devDependencies": {
    "@vitejs/plugin-react": "^4.3.1",
    "vite": "^5.4.0"
  }
}
"#;

const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>Sandforge App</title>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.jsx"></script>
  </body>
</html>
"#;

const VITE_CONFIG: &str = r#"import { defineConfig } from 'vite';
import react from '@vitejs/plugin-react';

export default defineConfig({
  plugins: [react()],
  server: { host: '0.0.0.0', port: 5173, strictPort: true },
});
"#;

const MAIN_JSX: &str = r#"import React from 'react';
import ReactDOM from 'react-dom/client';
import App from './App.jsx';
import './index.css';

ReactDOM.createRoot(document.getElementById('root')).render(
  <React.StrictMode>
    <App />
  </React.StrictMode>,
);
"#;

const APP_JSX: &str = r#"export default function App() {
  return (
    <main className="app">
      <h1>Ready to build</h1>
      <p>Describe what you want and it will appear here.</p>
    </main>
  );
}
"#;

const INDEX_CSS: &str = r#"body {
  margin: 0;
  font-family: system-ui, sans-serif;
}

.app {
  padding: 2rem;
}
"#;

/// Minimal Vite + React project.
pub fn vite_react() -> Vec<(String, String)> {
    [
        ("package.json", PACKAGE_JSON),
        ("index.html", INDEX_HTML),
        ("vite.config.js", VITE_CONFIG),
        ("src/main.jsx", MAIN_JSX),
        ("src/App.jsx", APP_JSX),
        ("src/index.css", INDEX_CSS),
    ]
    .into_iter()
    .map(|(path, content)| (path.to_string(), content.to_string()))
    .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageJson {
    #[serde(default)]
    dependencies: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, serde_json::Value>,
}

/// Package names declared by the `package.json` of a file set.
///
/// A missing or malformed `package.json` declares nothing.
pub fn declared_packages(files: &[(String, String)]) -> Vec<String> {
    files
        .iter()
        .find(|(path, _)| path == "package.json")
        .and_then(|(_, content)| serde_json::from_str::<PackageJson>(content).ok())
        .map(|pkg| {
            pkg.dependencies
                .into_keys()
                .chain(pkg.dev_dependencies.into_keys())
                .collect()
        })
        .unwrap_or_default()
}
