use axum::response::Html;

// Smallest page that exercises the API: upload control, preview, label.
const DEMO_PAGE: &str = r#"<!doctype html>
<html>
<head>
  <meta charset="utf-8">
  <title>Is it a dog or a cat?</title>
</head>
<body>
  <h1>Is it a dog or a cat?</h1>
  <p>AI Model</p>
  <input id="file-input" type="file">
  <div><img id="preview" alt="Uploaded" hidden></div>
  <p id="label">Test the IA model...</p>
  <script>
    const input = document.getElementById("file-input");
    const preview = document.getElementById("preview");
    const label = document.getElementById("label");

    input.addEventListener("change", async () => {
      const file = input.files[0];
      if (!file) return;

      preview.src = URL.createObjectURL(file);
      preview.hidden = false;

      const response = await fetch("/predict", { method: "POST", body: file });
      const result = await response.json();
      label.textContent = response.ok ? result.display : result.error;
    });
  </script>
</body>
</html>
"#;

pub async fn demo_page() -> Html<&'static str> {
    Html(DEMO_PAGE)
}
