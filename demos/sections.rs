use list_tiles::{HeaderElement, ItemElement, ListModel, TileKind, TileManager, TileManagerOptions};

/// Contact names, sorted, grouped by their first letter.
struct Contacts {
    names: Vec<&'static str>,
}

impl Contacts {
    fn letter(&self, position: usize) -> Option<char> {
        self.names[position].chars().next()
    }
}

impl ListModel for Contacts {
    type Item = &'static str;

    fn n_items(&self) -> usize {
        self.names.len()
    }

    fn item(&self, position: usize) -> &'static str {
        self.names[position]
    }

    fn has_sections(&self) -> bool {
        true
    }

    fn section(&self, position: usize) -> (usize, usize) {
        let letter = self.letter(position);
        let mut start = position;
        while start > 0 && self.letter(start - 1) == letter {
            start -= 1;
        }
        let mut end = position + 1;
        while end < self.names.len() && self.letter(end) == letter {
            end += 1;
        }
        (start, end)
    }
}

#[derive(Default)]
struct ContactRow {
    name: Option<&'static str>,
    position: Option<usize>,
}

impl ItemElement<&'static str> for ContactRow {
    fn bind(&mut self, position: usize, item: &'static str, _selected: bool) {
        self.name = Some(item);
        self.position = Some(position);
    }

    fn update(&mut self, position: usize, _selected: bool) {
        self.position = Some(position);
    }

    fn item(&self) -> Option<&&'static str> {
        self.name.as_ref()
    }

    fn position(&self) -> Option<usize> {
        self.position
    }
}

#[derive(Default)]
struct LetterHeader {
    title: String,
    range: Option<(usize, usize)>,
}

impl HeaderElement<&'static str> for LetterHeader {
    fn bind(&mut self, item: &'static str, start: usize, end: usize) {
        self.title = item.chars().take(1).collect();
        self.range = Some((start, end));
    }

    fn range(&self) -> Option<(usize, usize)> {
        self.range
    }
}

fn print_tiles(m: &TileManager<Contacts, ContactRow, LetterHeader>) {
    let mut line = Vec::new();
    for (_, tile) in m.tiles() {
        match tile.kind() {
            TileKind::Header { matched: true } => {
                let title = tile.header_element().map_or("?", |h| h.title.as_str());
                line.push(format!("[{title}]"));
            }
            TileKind::Header { matched: false } => line.push("[..]".to_string()),
            TileKind::Footer { .. } => line.push("|".to_string()),
            TileKind::Run => match tile.element().and_then(|row| row.item()) {
                Some(name) => line.push((*name).to_string()),
                None => line.push(format!("<{}>", tile.n_items())),
            },
            TileKind::Tombstone => {}
        }
    }
    println!("{}", line.join(" "));
}

fn main() {
    let opts = TileManagerOptions::new_with_headers(ContactRow::default, LetterHeader::default)
        .with_has_sections(true)
        .with_prepare_section(Some(|_tile, position| {
            println!("new section boundary at {position}");
        }));

    let mut m = TileManager::new(opts);
    m.set_model(Some(Contacts {
        names: vec![
            "Ada", "Alan", "Barbara", "Brian", "Claude", "Dennis", "Donald", "Edsger", "Grace",
            "Guido", "Ken", "Linus",
        ],
    }));
    print_tiles(&m);

    let viewport = m.tracker_create();
    m.tracker_set_window(viewport, 5, 1, 2);
    print_tiles(&m);

    // A new contact starting a new letter right before the viewport.
    if let Some(model) = m.model_mut() {
        model.names.insert(5, "Charles");
    }
    m.on_items_changed(5, 0, 1);
    m.gc();
    print_tiles(&m);

    m.set_has_sections(false);
    m.gc();
    print_tiles(&m);

    if let Err(err) = m.validate_compact() {
        eprintln!("inconsistent tiles: {err}");
    }
}
