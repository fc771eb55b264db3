//! System prompts sent ahead of every conversation.
//!
//! Each prompt describes the sheet (shape, first rows, column types), the
//! frame API generated code may use, and the `[CODE]` reply layout that
//! [`crate::response::parse_response`] expects.

use sheetchat_config::settings::Language;
use sheetchat_engine::table::Table;

use crate::response::{CODE_END_MARKER, CODE_MARKER, ENTRY_FUNCTION};

/// Rows of the sheet shown to the model.
pub const HEAD_ROWS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Code runs and its result is merged into the sheet
    #[default]
    Chat,
    /// Code is scanned for drawing calls and never run
    Chart,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Some(Mode::Chat),
            "chart" | "plot" | "graphique" => Some(Mode::Chart),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mode::Chat => "chat",
            Mode::Chart => "chart",
        }
    }
}

/// The parts of the sheet a prompt embeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub shape: String,
    pub head: String,
    pub dtypes: String,
}

impl TableSummary {
    pub fn of(table: &Table) -> Self {
        let (rows, cols) = table.shape();
        let width = table
            .column_names()
            .iter()
            .map(|n| n.chars().count())
            .max()
            .unwrap_or(0);
        let dtypes = table
            .dtypes()
            .iter()
            .map(|(name, dtype)| format!("{:<width$}  {}", name, dtype, width = width))
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            shape: format!("({}, {})", rows, cols),
            head: table.head(HEAD_ROWS).to_string(),
            dtypes,
        }
    }

    fn block(&self) -> String {
        format!(
            "[\ndf.shape:\n{}\ndf.head:\n{}\ndf.dtypes:\n{}\n]",
            self.shape, self.head, self.dtypes
        )
    }
}

const FRAME_API_EN: &str = "\
`df` is a Frame (Lua). Columns are lists indexed from 1; missing values are NULL.
  df:nrows()  df:ncols()  df:columns()  df:has_column(name)
  df:col(name) -> list          df:get(i, name)  df:set(i, name, v)
  df:row(i) -> {name = v}       for i, row in df:rows() do ... end
  df:set_column(name, list | function(row, i) | value)
  df:add_column(name, ...)  df:drop_column(name)  df:rename(old, new)  df:select({names})
  df:filter(function(row, i) return bool end)   df:sort_by(name, descending)
  df:head(n)  df:copy()  df:map(name, function(v) ... end)
  df:sum(name)  df:mean(name)  df:min(name)  df:max(name)  df:count(name)
  df:insert_row(i, {name = v})  df:append_row({name = v})  df:delete_row(i)
  is_null(v)  Frame.new({names})
Standard Lua string, table and math libraries are available. There is no file, OS or network access.";

const FRAME_API_FR: &str = "\
`df` est un Frame (Lua). Les colonnes sont des listes indexées à partir de 1 ; les valeurs manquantes valent NULL.
  df:nrows()  df:ncols()  df:columns()  df:has_column(nom)
  df:col(nom) -> liste          df:get(i, nom)  df:set(i, nom, v)
  df:row(i) -> {nom = v}        for i, row in df:rows() do ... end
  df:set_column(nom, liste | function(row, i) | valeur)
  df:add_column(nom, ...)  df:drop_column(nom)  df:rename(ancien, nouveau)  df:select({noms})
  df:filter(function(row, i) return bool end)   df:sort_by(nom, decroissant)
  df:head(n)  df:copy()  df:map(nom, function(v) ... end)
  df:sum(nom)  df:mean(nom)  df:min(nom)  df:max(nom)  df:count(nom)
  df:insert_row(i, {nom = v})  df:append_row({nom = v})  df:delete_row(i)
  is_null(v)  Frame.new({noms})
Les bibliothèques Lua string, table et math sont disponibles. Aucun accès aux fichiers, au système ou au réseau.";

const CHART_API: &str = "\
  ax:plot(x, y, {label = \"...\", color = \"...\"})
  ax:bar(labels, heights)   ax:barh(labels, widths)   ax:scatter(x, y)
  ax:hist(values, {bins = 10})   ax:pie(values, {labels = names})
  ax:set_title(\"...\")  ax:set_xlabel(\"...\")  ax:set_ylabel(\"...\")  ax:legend()";

fn chat_en(summary: &TableSummary) -> String {
    format!(
        "You are a data analyst and a friendly spreadsheet assistant working on the user's sheet.\n\
         Your reply has two parts:\n\
         1. A short, conversational explanation of what you are going to do.\n\
         2. Lua code after the {marker} tag, closed by {end}.\n\n\
         Rule 1: The code defines exactly one function, `function {entry}(df) ... end`, that returns \
         the modified frame, a single value, or nil.\n\
         Rule 2: Do not use markdown fences.\n\
         Rule 3: Be precise about the logic (say whether you average, filter, sort...).\n\
         Rule 4: If the question has nothing to do with the data, answer in text only and give no code.\n\n\
         {api}\n\n\
         Table structure:\n{block}\n\
         Answer professionally and concisely.",
        marker = CODE_MARKER,
        end = CODE_END_MARKER,
        entry = ENTRY_FUNCTION,
        api = FRAME_API_EN,
        block = summary.block(),
    )
}

fn chat_fr(summary: &TableSummary) -> String {
    format!(
        "Vous êtes un analyste de données et un assistant tableur amical qui travaille sur la feuille de l'utilisateur.\n\
         Votre réponse comporte deux parties :\n\
         1. Une explication courte et conversationnelle de ce que vous allez faire (en français).\n\
         2. Le code Lua après la balise {marker}, fermée par {end}.\n\n\
         Règle 1 : Le code définit une seule fonction, `function {entry}(df) ... end`, qui renvoie \
         le frame modifié, une valeur unique ou nil.\n\
         Règle 2 : N'utilisez pas de balises markdown.\n\
         Règle 3 : Soyez précis sur la logique (moyenne, filtre, tri...).\n\
         Règle 4 : Si la question ne concerne pas les données, répondez en texte uniquement, sans code.\n\n\
         {api}\n\n\
         Structure du tableau :\n{block}\n\
         Répondez de manière professionnelle et concise.",
        marker = CODE_MARKER,
        end = CODE_END_MARKER,
        entry = ENTRY_FUNCTION,
        api = FRAME_API_FR,
        block = summary.block(),
    )
}

fn chart_en(summary: &TableSummary) -> String {
    format!(
        "You are a data visualization expert. First explain briefly which chart you chose, \
         then give the drawing calls after the {marker} tag, closed by {end}.\n\
         Rule 1: Draw on the existing axes object `ax`, one call per line:\n{chart}\n\
         Rule 2: Refer to columns as df[\"name\"]; values may also be numbers, strings or lists like {{1, 2, 3}}.\n\
         Rule 3: If the question is not about charting this data, answer in text only.\n\n\
         Table structure:\n{block}",
        marker = CODE_MARKER,
        end = CODE_END_MARKER,
        chart = CHART_API,
        block = summary.block(),
    )
}

fn chart_fr(summary: &TableSummary) -> String {
    format!(
        "Vous êtes un expert en visualisation de données. Expliquez d'abord brièvement le type de graphique \
         choisi, puis donnez les appels de dessin après la balise {marker}, fermée par {end}.\n\
         Règle 1 : Dessinez sur l'objet d'axes `ax` déjà créé, un appel par ligne :\n{chart}\n\
         Règle 2 : Désignez les colonnes par df[\"nom\"] ; les valeurs peuvent aussi être des nombres, \
         des chaînes ou des listes comme {{1, 2, 3}}.\n\
         Règle 3 : Si la question ne porte pas sur un graphique de ces données, répondez en texte uniquement.\n\n\
         Structure du tableau :\n{block}",
        marker = CODE_MARKER,
        end = CODE_END_MARKER,
        chart = CHART_API,
        block = summary.block(),
    )
}

/// The system prompt for `mode` in `language`, describing `table`.
pub fn system_prompt(mode: Mode, language: Language, table: &Table) -> String {
    let summary = TableSummary::of(table);
    match (mode, language) {
        (Mode::Chat, Language::En) => chat_en(&summary),
        (Mode::Chat, Language::Fr) => chat_fr(&summary),
        (Mode::Chart, Language::En) => chart_en(&summary),
        (Mode::Chart, Language::Fr) => chart_fr(&summary),
    }
}
