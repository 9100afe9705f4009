use council_core::Persona;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PersonaRow {
    pub id: String,
    pub name: String,
    pub prompt_template: String,
    pub reasoning_style: String,
    pub tone: String,
    pub usage_count: i64,
    pub win_rate: f64,
}

impl PersonaRow {
    pub fn into_domain(self) -> Persona {
        Persona {
            id: self.id,
            name: self.name,
            prompt_template: self.prompt_template,
            reasoning_style: self.reasoning_style,
            tone: self.tone,
            usage_count: self.usage_count.max(0) as u64,
            win_rate: self.win_rate,
        }
    }
}

impl From<&Persona> for PersonaRow {
    fn from(persona: &Persona) -> Self {
        Self {
            id: persona.id.clone(),
            name: persona.name.clone(),
            prompt_template: persona.prompt_template.clone(),
            reasoning_style: persona.reasoning_style.clone(),
            tone: persona.tone.clone(),
            usage_count: persona.usage_count as i64,
            win_rate: persona.win_rate,
        }
    }
}
