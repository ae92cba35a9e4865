use once_cell::sync::Lazy;
use regex::Regex;

// inline image markdown as produced by the image handler (or any data-uri image)
static INLINE_IMAGE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!\[[^\]]*\]\(data:image/[^;]*;base64,[^)]*\)")
        .expect("inline image regex should compile")
});

// the separator placed between an assistant reply and anything appended to it later
const AMENDMENT_SEPARATOR: &str = "\n\n";

// one exchange in the conversation: what the user said and what came back.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Turn {
    pub user_text: String,
    pub assistant_text: String,
}
impl Turn {
    pub fn new(user_text: &str, assistant_text: &str) -> Self {
        Self {
            user_text: user_text.to_owned(),
            assistant_text: assistant_text.to_owned(),
        }
    }

    // returns the assistant text with every inline image removed, so that the
    // base64 payloads never go back to the text model.
    pub fn assistant_text_without_images(&self) -> String {
        strip_inline_images(&self.assistant_text)
    }
}

// this is the opaque store for the visible chat history. turns can only be appended,
// and only the last one can ever be changed afterwards.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transcript {
    turns: Vec<Turn>,
}
impl Transcript {
    pub fn new() -> Self {
        Self { turns: Vec::new() }
    }

    // adds a new turn to the end of the transcript
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    // appends `addition` to the assistant text of the last turn, separated by a blank line.
    // if there are no turns yet, a new one with empty user text is created to hold it.
    pub fn amend_last(&mut self, addition: &str) {
        match self.turns.last_mut() {
            Some(last) => {
                last.assistant_text.push_str(AMENDMENT_SEPARATOR);
                last.assistant_text.push_str(addition);
            }
            None => self.turns.push(Turn::new("", addition)),
        }
    }

    // renders the conversation the way the text model sees it, one
    // `User:`/`Assistant:` pair per turn with inline images removed.
    pub fn flatten_for_prompt(&self) -> String {
        let mut buf = String::new();
        for turn in &self.turns {
            buf.push_str("User: ");
            buf.push_str(&turn.user_text);
            buf.push_str("\nAssistant: ");
            buf.push_str(&turn.assistant_text_without_images());
            buf.push('\n');
        }
        buf
    }

    #[cfg(test)]
    pub fn get(&self, index: usize) -> Option<&Turn> {
        self.turns.get(index)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Turn> {
        self.turns.iter()
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

// removes inline image markdown from the text and tidies the blank lines it leaves behind.
pub fn strip_inline_images(text: &str) -> String {
    if !INLINE_IMAGE_REGEX.is_match(text) {
        return text.to_owned();
    }
    let stripped = INLINE_IMAGE_REGEX.replace_all(text, "");
    stripped.trim_end().to_owned()
}

// a single piece of assistant text, split so the UI can show images as a placeholder.
#[derive(Clone, Debug, PartialEq)]
pub enum AssistantSegment<'a> {
    Text(&'a str),
    // the base64 payload of an inline image
    Image(&'a str),
}

// breaks the text into alternating runs of plain text and inline images
pub fn split_inline_images(text: &str) -> Vec<AssistantSegment<'_>> {
    let mut segments = Vec::new();
    let mut cursor = 0;
    for m in INLINE_IMAGE_REGEX.find_iter(text) {
        if m.start() > cursor {
            segments.push(AssistantSegment::Text(&text[cursor..m.start()]));
        }
        let md = m.as_str();
        let payload = md
            .find(";base64,")
            .map(|idx| &md[idx + ";base64,".len()..md.len() - 1])
            .unwrap_or_default();
        segments.push(AssistantSegment::Image(payload));
        cursor = m.end();
    }
    if cursor < text.len() {
        segments.push(AssistantSegment::Text(&text[cursor..]));
    }
    segments
}
